use std::collections::BTreeSet;

use regstat_core::{
    CategoryId, CompletenessStatus, Dimension, MappingPair, TripletMapping, WildcardMapping,
    completeness,
};
use regstat_store::{RegularizationStore, SqliteStore};
use serde::Serialize;

use crate::EngineError;
use crate::hierarchy::CanonicalHierarchy;
use crate::ids::IdSnapshot;

/// A pair's mappings together with its completeness against the canonical
/// hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingStatus {
    pub pair: MappingPair,
    pub wildcard: Option<WildcardMapping>,
    pub triplets: Vec<TripletMapping>,
    pub expected_model_years: BTreeSet<CategoryId>,
    pub status: CompletenessStatus,
}

pub(crate) fn mapping_status(
    store: &SqliteStore,
    hierarchy: &CanonicalHierarchy,
    pair: MappingPair,
) -> Result<MappingStatus, EngineError> {
    let wildcard = store.get_mapping(pair)?;
    let triplets = store.list_triplets(pair)?;
    Ok(status_of(hierarchy, pair, wildcard, triplets))
}

pub(crate) fn status_of(
    hierarchy: &CanonicalHierarchy,
    pair: MappingPair,
    wildcard: Option<WildcardMapping>,
    triplets: Vec<TripletMapping>,
) -> MappingStatus {
    let expected_model_years = wildcard
        .as_ref()
        .map(|mapping| hierarchy.model_years_for(mapping.canonical_make, mapping.canonical_model))
        .unwrap_or_default();
    let status = completeness(wildcard.as_ref(), &triplets, &expected_model_years);

    MappingStatus {
        pair,
        wildcard,
        triplets,
        expected_model_years,
        status,
    }
}

pub(crate) fn validate_wildcard(
    hierarchy: &CanonicalHierarchy,
    ids: &IdSnapshot,
    mapping: &WildcardMapping,
) -> Result<(), EngineError> {
    require_entity(ids, Dimension::Make, mapping.pair.make, "uncurated make")?;
    require_entity(ids, Dimension::Model, mapping.pair.model, "uncurated model")?;

    if !hierarchy.contains_model(mapping.canonical_make, mapping.canonical_model) {
        return Err(EngineError::InvalidMapping(format!(
            "canonical target {}/{} is not part of the curated hierarchy",
            ids.display_name(Dimension::Make, mapping.canonical_make),
            ids.display_name(Dimension::Model, mapping.canonical_model),
        )));
    }

    if let Some(vehicle_type) = mapping.vehicle_type.assigned() {
        require_entity(ids, Dimension::VehicleType, *vehicle_type, "vehicle type")?;
    }

    Ok(())
}

pub(crate) fn validate_triplet(
    hierarchy: &CanonicalHierarchy,
    ids: &IdSnapshot,
    wildcard: Option<&WildcardMapping>,
    triplet: &TripletMapping,
) -> Result<(), EngineError> {
    let Some(wildcard) = wildcard else {
        return Err(EngineError::InvalidMapping(format!(
            "pair {}/{} has no wildcard mapping; map the pair before its model years",
            ids.display_name(Dimension::Make, triplet.pair.make),
            ids.display_name(Dimension::Model, triplet.pair.model),
        )));
    };

    let expected = hierarchy.model_years_for(wildcard.canonical_make, wildcard.canonical_model);
    if !expected.contains(&triplet.model_year) {
        return Err(EngineError::InvalidMapping(format!(
            "model year {} does not exist for canonical model {}/{}",
            ids.display_name(Dimension::ModelYear, triplet.model_year),
            ids.display_name(Dimension::Make, wildcard.canonical_make),
            ids.display_name(Dimension::Model, wildcard.canonical_model),
        )));
    }

    if let Some(fuel_type) = triplet.fuel_type.assigned() {
        require_entity(ids, Dimension::FuelType, *fuel_type, "fuel type")?;
    }

    Ok(())
}

fn require_entity(
    ids: &IdSnapshot,
    dimension: Dimension,
    id: CategoryId,
    what: &str,
) -> Result<(), EngineError> {
    if ids.entity(dimension, id).is_none() {
        return Err(EngineError::InvalidMapping(format!("unknown {what} id {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use regstat_core::{Assignment, CanonicalEntity};
    use regstat_store::HierarchyRow;

    use super::*;

    fn hierarchy() -> CanonicalHierarchy {
        let row = |model_year| HierarchyRow {
            make: Some(CategoryId(1)),
            model: Some(CategoryId(2)),
            model_year: Some(CategoryId(model_year)),
            fuel_type: None,
            vehicle_type: None,
            rows: 1,
        };
        CanonicalHierarchy::from_rows(&[row(10), row(11)])
    }

    fn ids() -> IdSnapshot {
        let entity = |kind, id| CanonicalEntity {
            kind,
            id: CategoryId(id),
            code: format!("C{id}"),
            display_name: format!("C{id}"),
        };
        IdSnapshot::from_parts(
            vec![
                entity(Dimension::Make, 1),
                entity(Dimension::Make, 5),
                entity(Dimension::Model, 2),
                entity(Dimension::Model, 6),
                entity(Dimension::ModelYear, 10),
                entity(Dimension::ModelYear, 11),
                entity(Dimension::VehicleType, 40),
            ],
            Vec::new(),
        )
    }

    fn wildcard(canonical_model: i64) -> WildcardMapping {
        WildcardMapping {
            pair: MappingPair::new(CategoryId(5), CategoryId(6)),
            canonical_make: CategoryId(1),
            canonical_model: CategoryId(canonical_model),
            vehicle_type: Assignment::Assigned(CategoryId(40)),
        }
    }

    #[test]
    fn wildcard_target_must_exist_in_hierarchy() {
        assert!(validate_wildcard(&hierarchy(), &ids(), &wildcard(2)).is_ok());
        assert!(matches!(
            validate_wildcard(&hierarchy(), &ids(), &wildcard(6)),
            Err(EngineError::InvalidMapping(_))
        ));
    }

    #[test]
    fn triplet_needs_wildcard_and_known_model_year() {
        let mapping = wildcard(2);
        let triplet = |model_year| TripletMapping {
            pair: mapping.pair,
            model_year: CategoryId(model_year),
            fuel_type: Assignment::Unknown,
        };

        assert!(validate_triplet(&hierarchy(), &ids(), None, &triplet(10)).is_err());
        assert!(validate_triplet(&hierarchy(), &ids(), Some(&mapping), &triplet(10)).is_ok());
        assert!(validate_triplet(&hierarchy(), &ids(), Some(&mapping), &triplet(12)).is_err());
    }

    #[test]
    fn status_reports_expected_model_years_from_hierarchy() {
        let mapping = wildcard(2);
        let triplets = vec![TripletMapping {
            pair: mapping.pair,
            model_year: CategoryId(10),
            fuel_type: Assignment::Unknown,
        }];

        let status = status_of(&hierarchy(), mapping.pair, Some(mapping.clone()), triplets);
        assert_eq!(status.expected_model_years.len(), 2);
        assert_eq!(status.status, CompletenessStatus::NeedsReview);

        let none = status_of(&hierarchy(), mapping.pair, None, Vec::new());
        assert_eq!(none.status, CompletenessStatus::Unassigned);
        assert!(none.expected_model_years.is_empty());
    }
}
