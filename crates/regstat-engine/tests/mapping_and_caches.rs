use std::error::Error;
use std::path::Path;
use std::time::Duration;

use regstat_core::{
    Assignment, CategoryId, CompletenessStatus, Dimension, FilterConfiguration, FuelSlot,
    MappingPair, MetricSpec, TripletMapping, WildcardMapping,
};
use regstat_engine::{CancelToken, Engine, EngineError};
use regstat_store::{RegistrationRecord, SqliteStore, Store};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn row(year: i32, model: &str, model_year: &str, fuel_type: Option<&str>) -> RegistrationRecord {
    RegistrationRecord {
        year,
        make: Some("HONDA".to_owned()),
        model: Some(model.to_owned()),
        model_year: Some(model_year.to_owned()),
        fuel_type: fuel_type.map(str::to_owned),
        vehicle_type: Some("CAR".to_owned()),
        ..RegistrationRecord::default()
    }
}

/// Curated 2010 has HONDA CIVIC for model years 2010 to 2012; uncurated 2011
/// has the misspelled CIVC.
fn civic_fleet(workspace: &Path) -> Result<Engine, Box<dyn Error>> {
    let engine = Engine::open(workspace)?;
    engine.record_batch(&[
        row(2010, "CIVIC", "2010", Some("GAS")),
        row(2010, "CIVIC", "2011", Some("GAS")),
        row(2010, "CIVIC", "2012", Some("HYBRID")),
        row(2011, "CIVC", "2010", None),
        row(2011, "CIVC", "2012", None),
    ])?;
    engine.set_year_curated(2010, true)?;
    engine.set_year_curated(2011, false)?;
    Ok(engine)
}

fn civc_pair(engine: &Engine) -> Result<MappingPair, EngineError> {
    Ok(MappingPair::new(
        engine.resolve(Dimension::Make, "HONDA")?,
        engine.resolve(Dimension::Model, "CIVC")?,
    ))
}

fn civic_wildcard(engine: &Engine) -> Result<WildcardMapping, EngineError> {
    Ok(WildcardMapping {
        pair: civc_pair(engine)?,
        canonical_make: engine.resolve(Dimension::Make, "HONDA")?,
        canonical_model: engine.resolve(Dimension::Model, "CIVIC")?,
        vehicle_type: Assignment::Assigned(engine.resolve(Dimension::VehicleType, "CAR")?),
    })
}

fn triplet(
    engine: &Engine,
    model_year: &str,
    fuel_type: Assignment<CategoryId>,
) -> Result<TripletMapping, EngineError> {
    Ok(TripletMapping {
        pair: civc_pair(engine)?,
        model_year: engine.resolve(Dimension::ModelYear, model_year)?,
        fuel_type,
    })
}

fn count_2011() -> Result<FilterConfiguration, Box<dyn Error>> {
    Ok(FilterConfiguration::builder(MetricSpec::count())
        .years([2011])
        .select(Dimension::Model, ["CIVIC"])
        .regularization(true)
        .build()?)
}

#[test]
fn completeness_follows_reviewed_model_years() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    let pair = civc_pair(&engine)?;

    assert_eq!(
        engine.mapping_status(pair)?.status,
        CompletenessStatus::Unassigned
    );

    let status = engine.upsert_wildcard(&civic_wildcard(&engine)?)?;
    assert_eq!(status.status, CompletenessStatus::NeedsReview);
    assert_eq!(status.expected_model_years.len(), 3);

    let gas = Assignment::Assigned(engine.resolve(Dimension::FuelType, "GAS")?);
    engine.upsert_triplet(&triplet(&engine, "2010", gas)?)?;
    let status = engine.upsert_triplet(&triplet(&engine, "2011", Assignment::Unknown)?)?;
    assert_eq!(status.status, CompletenessStatus::NeedsReview);

    let status = engine.upsert_triplet(&triplet(&engine, "2012", Assignment::Unreviewed)?)?;
    assert_eq!(status.status, CompletenessStatus::NeedsReview);

    let status = engine.upsert_triplet(&triplet(&engine, "2012", Assignment::Unknown)?)?;
    assert_eq!(status.status, CompletenessStatus::Complete);
    assert_eq!(status.triplets.len(), 3);

    let listed = engine.list_mappings(None)?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, CompletenessStatus::Complete);
    Ok(())
}

#[test]
fn unreviewed_vehicle_type_keeps_pair_in_review() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;

    let mut mapping = civic_wildcard(&engine)?;
    mapping.vehicle_type = Assignment::Unreviewed;
    engine.upsert_wildcard(&mapping)?;
    for model_year in ["2010", "2011", "2012"] {
        engine.upsert_triplet(&triplet(&engine, model_year, Assignment::Unknown)?)?;
    }

    let status = engine.mapping_status(mapping.pair)?;
    assert_eq!(status.status, CompletenessStatus::NeedsReview);
    assert_eq!(
        status.wildcard.map(|wildcard| wildcard.vehicle_type),
        Some(Assignment::Unreviewed)
    );
    Ok(())
}

#[test]
fn invalid_mappings_are_rejected_without_writing() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    let pair = civc_pair(&engine)?;

    // Triplet before any wildcard.
    let early = engine.upsert_triplet(&triplet(&engine, "2010", Assignment::Unknown)?);
    assert!(matches!(early, Err(EngineError::InvalidMapping(_))));

    // Canonical target that only exists in uncurated data.
    let mut mapping = civic_wildcard(&engine)?;
    mapping.canonical_model = engine.resolve(Dimension::Model, "CIVC")?;
    let outside = engine.upsert_wildcard(&mapping);
    assert!(matches!(outside, Err(EngineError::InvalidMapping(_))));
    assert!(engine.mapping_status(pair)?.wildcard.is_none());

    engine.upsert_wildcard(&civic_wildcard(&engine)?)?;
    let unknown_year = engine.ensure_category(Dimension::ModelYear, "1999", None)?;
    let result = engine.upsert_triplet(&TripletMapping {
        pair,
        model_year: unknown_year,
        fuel_type: Assignment::Unknown,
    });
    assert!(matches!(result, Err(EngineError::InvalidMapping(_))));
    assert!(engine.mapping_status(pair)?.triplets.is_empty());
    Ok(())
}

#[test]
fn retargeting_a_wildcard_drops_fuel_assignments_of_the_old_model() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    engine.record_batch(&[row(2010, "ACCORD", "2012", Some("GAS"))])?;
    let gas_2011 = FilterConfiguration::builder(MetricSpec::count())
        .years([2011])
        .select(Dimension::FuelType, ["GAS"])
        .regularization(true)
        .build()?;

    let mut mapping = civic_wildcard(&engine)?;
    engine.upsert_wildcard(&mapping)?;
    let gas = Assignment::Assigned(engine.resolve(Dimension::FuelType, "GAS")?);
    engine.upsert_triplet(&triplet(&engine, "2010", gas)?)?;
    let before = engine.run_query(&gas_2011)?;

    mapping.canonical_model = engine.resolve(Dimension::Model, "ACCORD")?;
    let status = engine.upsert_wildcard(&mapping)?;
    let after = engine.run_query(&gas_2011)?;

    assert_eq!(before.points[0].value.measured(), Some(1.0));
    assert_eq!(status.expected_model_years.len(), 1);
    assert!(status.triplets.is_empty());
    assert_eq!(status.status, CompletenessStatus::NeedsReview);
    assert_eq!(after.points[0].value.measured(), Some(0.0));
    Ok(())
}

#[test]
fn deleting_a_mapping_stops_regularizing_its_rows() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    let pair = civc_pair(&engine)?;

    let before = engine.run_query(&count_2011()?)?;
    engine.upsert_wildcard(&civic_wildcard(&engine)?)?;
    let mapped = engine.run_query(&count_2011()?)?;
    assert!(engine.delete_mapping(pair)?);
    let after = engine.run_query(&count_2011()?)?;

    assert_eq!(before.points[0].value.measured(), Some(0.0));
    assert_eq!(mapped.points[0].value.measured(), Some(2.0));
    assert_eq!(after.points[0].value.measured(), Some(0.0));
    assert!(!engine.delete_mapping(pair)?);
    Ok(())
}

#[test]
fn every_write_kind_refreshes_cached_state() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    let honda = engine.resolve(Dimension::Make, "HONDA")?;
    let civic = engine.resolve(Dimension::Model, "CIVIC")?;

    let mut version = engine.hierarchy()?.version;
    let mut next_version = |engine: &Engine| -> Result<bool, EngineError> {
        let current = engine.hierarchy()?.version;
        let advanced = current > version;
        version = current;
        Ok(advanced)
    };

    engine.record_batch(&[row(2010, "CIVIC", "2013", Some("GAS"))])?;
    assert!(next_version(&engine)?);
    assert_eq!(engine.model_years_for(honda, civic)?.len(), 4);

    engine.set_year_curated(2011, true)?;
    assert!(next_version(&engine)?);
    let civc = engine.resolve(Dimension::Model, "CIVC")?;
    assert!(engine.hierarchy()?.contains_model(honda, civc));

    engine.set_year_curated(2011, false)?;
    assert!(next_version(&engine)?);
    assert!(!engine.hierarchy()?.contains_model(honda, civc));

    engine.upsert_wildcard(&civic_wildcard(&engine)?)?;
    assert!(next_version(&engine)?);

    engine.upsert_triplet(&triplet(&engine, "2010", Assignment::Unknown)?)?;
    assert!(next_version(&engine)?);

    engine.delete_mapping(civc_pair(&engine)?)?;
    assert!(next_version(&engine)?);

    engine.ensure_category(Dimension::FuelType, "ELECTRIC", Some("Electric"))?;
    assert!(next_version(&engine)?);
    assert!(engine.resolve(Dimension::FuelType, "electric").is_ok());
    Ok(())
}

#[test]
fn writes_from_another_connection_are_picked_up() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    let honda = engine.resolve(Dimension::Make, "HONDA")?;
    let civc = engine.resolve(Dimension::Model, "CIVC")?;
    assert!(!engine.hierarchy()?.contains_model(honda, civc));

    let other = SqliteStore::open_path(engine.db_path(), Duration::from_secs(5))?;
    other.set_year_curated(2011, true)?;
    other.ensure_category(Dimension::Make, "ACURA", None)?;

    assert!(engine.hierarchy()?.contains_model(honda, civc));
    assert!(engine.resolve(Dimension::Make, "ACURA").is_ok());
    assert_eq!(engine.hierarchy()?.version, other.data_version()?);
    Ok(())
}

#[test]
fn curated_model_year_without_fuel_type_is_unassigned() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    engine.record_batch(&[row(2010, "CIVIC", "2014", None)])?;

    let hierarchy = engine.hierarchy()?;
    let node = hierarchy
        .model_year(
            engine.resolve(Dimension::Make, "HONDA")?,
            engine.resolve(Dimension::Model, "CIVIC")?,
            engine.resolve(Dimension::ModelYear, "2014")?,
        )
        .ok_or("model year 2014 missing from hierarchy")?;

    assert_eq!(node.fuel_types.len(), 1);
    assert!(node.fuel_types.contains(&FuelSlot::Unassigned));
    assert_eq!(node.rows, 1);
    Ok(())
}

#[test]
fn cancelled_query_job_returns_cancelled() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;

    let token = CancelToken::new();
    token.cancel();
    let job = engine.spawn_query_with(token, count_2011()?)?;

    assert!(matches!(job.join(), Err(EngineError::Cancelled)));
    Ok(())
}

#[test]
fn query_job_matches_foreground_query() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    engine.upsert_wildcard(&civic_wildcard(&engine)?)?;

    let foreground = engine.run_query(&count_2011()?)?;
    let background = engine.spawn_query(count_2011()?)?.join()?;

    assert_eq!(background, foreground);
    Ok(())
}

#[test]
fn hierarchy_job_publishes_snapshot() -> TestResult {
    let temp = tempdir()?;
    let engine = civic_fleet(temp.path())?;
    assert!(engine.peek_hierarchy().is_none());

    let built = engine.spawn_hierarchy_rebuild(CancelToken::new())?.join()?;
    let published = engine
        .peek_hierarchy()
        .ok_or("rebuild job did not publish")?;

    assert_eq!(published.version, built.version);
    assert_eq!(published.model_year_count(), 3);

    let token = CancelToken::new();
    token.cancel();
    let cancelled = engine.spawn_hierarchy_rebuild(token)?.join();
    assert!(matches!(cancelled, Err(EngineError::Cancelled)));
    Ok(())
}
