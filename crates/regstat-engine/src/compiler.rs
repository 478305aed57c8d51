//! Translation of a [`FilterConfiguration`] into parameterized SQL.
//!
//! Regularization is always expressed as a per-row `EXISTS` against the
//! mapping tables, scoped to uncurated years. The compiler never widens an IN
//! list with the ids of other mapped pairs: a row matches through its own
//! mapping or not at all.

use std::collections::{BTreeMap, BTreeSet};

use regstat_core::{CategoryId, Dimension, FilterConfiguration, MetricKind, MetricSpec};
use regstat_store::{SqlQuery, SqlValue, attribute_column, dimension_column, numeric_column};
use serde::Serialize;

use crate::EngineError;
use crate::cache::Versioned;
use crate::ids::IdSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    Year,
    /// Year and effective vehicle type, for per-category weighting.
    YearAndVehicleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedSelection {
    pub dimension: Dimension,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub primary: SqlQuery,
    /// Denominator query of a percentage metric.
    pub baseline: Option<SqlQuery>,
    pub metric: MetricSpec,
    pub grouping: Grouping,
    /// Years the resulting series covers, ascending.
    pub series_years: Vec<i32>,
    pub regularization_applied: bool,
    pub unresolved: Vec<UnresolvedSelection>,
    /// Version of the id snapshot the query was compiled against.
    pub data_version: u64,
}

#[derive(Debug, Clone)]
pub struct QueryCompiler {
    reference_load: f64,
}

type ResolvedSelections = BTreeMap<Dimension, BTreeSet<CategoryId>>;

impl QueryCompiler {
    pub fn new(reference_load: f64) -> Self {
        Self { reference_load }
    }

    pub fn reference_load(&self) -> f64 {
        self.reference_load
    }

    pub fn compile(
        &self,
        config: &FilterConfiguration,
        ids: &Versioned<IdSnapshot>,
    ) -> Result<CompiledQuery, EngineError> {
        config.validate()?;

        let regularize = config.regularization_effective();

        let (selections, unresolved) = resolve_selections(config, ids);
        for missing in &unresolved {
            tracing::warn!(
                dimension = %missing.dimension,
                value = %missing.value,
                "selection did not resolve to a known id, dimension matches no rows"
            );
        }

        let kind = config.metric().kind;
        let (primary, regularization_applied) =
            self.build_query(kind, &selections, config, regularize);

        let baseline = match kind {
            MetricKind::Percentage {
                baseline_dimension: Some(dimension),
            } => {
                let mut reduced = selections.clone();
                reduced.remove(&dimension);
                let (baseline, _) = self.build_query(MetricKind::Count, &reduced, config, regularize);
                Some(baseline)
            }
            _ => None,
        };

        tracing::debug!(
            sql = %primary.sql,
            binds = primary.binds.len(),
            baseline = baseline.is_some(),
            regularization_applied,
            "compiled query"
        );

        Ok(CompiledQuery {
            primary,
            baseline,
            metric: *config.metric(),
            grouping: match kind {
                MetricKind::PhysicalIndex { .. } => Grouping::YearAndVehicleType,
                _ => Grouping::Year,
            },
            series_years: series_years(config, ids),
            regularization_applied,
            unresolved,
            data_version: ids.version,
        })
    }

    fn build_query(
        &self,
        kind: MetricKind,
        selections: &ResolvedSelections,
        config: &FilterConfiguration,
        regularize: bool,
    ) -> (SqlQuery, bool) {
        let mut sql = SqlBuilder::default();
        let mut predicates = Vec::new();
        let mut applied = false;

        if !config.years().is_empty() {
            let years = config
                .years()
                .iter()
                .map(|year| sql.bind(SqlValue::Integer(i64::from(*year))))
                .collect::<Vec<_>>()
                .join(", ");
            predicates.push(format!("y.year IN ({years})"));
        }
        if config.curated_years_only() {
            predicates.push("y.curated = 1".to_owned());
        }

        for (dimension, ids) in selections {
            let (predicate, regularized) = dimension_predicate(&mut sql, *dimension, ids, regularize);
            applied |= regularized;
            predicates.push(predicate);
        }

        let value = match kind {
            MetricKind::Count | MetricKind::Percentage { .. } => "COUNT(*)".to_owned(),
            MetricKind::Sum { attribute } => format!("SUM(r.{})", numeric_column(attribute)),
            MetricKind::Average { attribute } => format!("AVG(r.{})", numeric_column(attribute)),
            MetricKind::Coverage { attribute, .. } => format!(
                "SUM(CASE WHEN r.{} IS NOT NULL THEN 1 ELSE 0 END)",
                attribute_column(attribute)
            ),
            MetricKind::PhysicalIndex { attribute } => {
                let reference = sql.bind(SqlValue::Real(self.reference_load));
                let term = format!("(r.{} / {reference})", numeric_column(attribute));
                format!("SUM({term} * {term} * {term} * {term})")
            }
        };

        let category = match kind {
            MetricKind::PhysicalIndex { .. } if regularize => {
                applied = true;
                MAPPED_VEHICLE_TYPE.to_owned()
            }
            MetricKind::PhysicalIndex { .. } => "r.vehicle_type_id".to_owned(),
            _ => "NULL".to_owned(),
        };
        let group_by = match kind {
            MetricKind::PhysicalIndex { .. } => "y.year, category",
            _ => "y.year",
        };

        let mut text = format!(
            "SELECT y.year AS year, {category} AS category, {value} AS value, COUNT(*) AS row_count \
             FROM registrations r JOIN years y ON y.id = r.year_id"
        );
        if !predicates.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&predicates.join(" AND "));
        }
        text.push_str(&format!(" GROUP BY {group_by} ORDER BY y.year"));

        (
            SqlQuery {
                sql: text,
                binds: sql.binds,
            },
            applied,
        )
    }
}

/// Row vehicle type, falling back in uncurated years to the type assigned on
/// the row's own wildcard mapping.
const MAPPED_VEHICLE_TYPE: &str = "COALESCE(r.vehicle_type_id, CASE WHEN y.curated = 0 THEN \
     (SELECT w.vehicle_type_id FROM wildcard_mappings w \
     WHERE w.uncurated_make_id = r.make_id AND w.uncurated_model_id = r.model_id \
     AND w.vehicle_type_state = 'assigned') END)";

#[derive(Default)]
struct SqlBuilder {
    binds: Vec<SqlValue>,
}

impl SqlBuilder {
    fn bind(&mut self, value: SqlValue) -> String {
        self.binds.push(value);
        format!("?{}", self.binds.len())
    }

    fn bind_ids(&mut self, ids: &BTreeSet<CategoryId>) -> String {
        ids.iter()
            .map(|id| self.bind(SqlValue::Integer(id.get())))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Predicate for one dimension, and whether it expands through the mapping
/// tables.
fn dimension_predicate(
    sql: &mut SqlBuilder,
    dimension: Dimension,
    ids: &BTreeSet<CategoryId>,
    regularize: bool,
) -> (String, bool) {
    if ids.is_empty() {
        return ("0 = 1".to_owned(), false);
    }

    let column = dimension_column(dimension);
    let list = sql.bind_ids(ids);
    let direct = format!("r.{column} IN ({list})");
    if !regularize || !dimension.is_regularizable() {
        return (direct, false);
    }

    let expansion = match dimension {
        Dimension::ModelYear => return (direct, false),
        Dimension::Make => format!(
            "EXISTS (SELECT 1 FROM wildcard_mappings w \
             WHERE w.uncurated_make_id = r.make_id AND w.uncurated_model_id = r.model_id \
             AND w.canonical_make_id IN ({list}))"
        ),
        Dimension::Model => format!(
            "EXISTS (SELECT 1 FROM wildcard_mappings w \
             WHERE w.uncurated_make_id = r.make_id AND w.uncurated_model_id = r.model_id \
             AND w.canonical_model_id IN ({list}))"
        ),
        Dimension::VehicleType => format!(
            "r.vehicle_type_id IS NULL AND EXISTS (SELECT 1 FROM wildcard_mappings w \
             WHERE w.uncurated_make_id = r.make_id AND w.uncurated_model_id = r.model_id \
             AND w.vehicle_type_state = 'assigned' AND w.vehicle_type_id IN ({list}))"
        ),
        Dimension::FuelType => format!(
            "r.fuel_type_id IS NULL AND EXISTS (SELECT 1 FROM triplet_mappings t \
             WHERE t.uncurated_make_id = r.make_id AND t.uncurated_model_id = r.model_id \
             AND t.model_year_id = r.model_year_id \
             AND t.fuel_type_state = 'assigned' AND t.fuel_type_id IN ({list}))"
        ),
    };

    (format!("({direct} OR (y.curated = 0 AND {expansion}))"), true)
}

fn resolve_selections(
    config: &FilterConfiguration,
    ids: &IdSnapshot,
) -> (ResolvedSelections, Vec<UnresolvedSelection>) {
    let mut resolved = ResolvedSelections::new();
    let mut unresolved = Vec::new();

    for (dimension, values) in config.selections() {
        let entry = resolved.entry(dimension).or_default();
        for value in values {
            match ids.resolve(dimension, value) {
                Some(id) => {
                    entry.insert(id);
                }
                None => unresolved.push(UnresolvedSelection {
                    dimension,
                    value: value.clone(),
                }),
            }
        }
    }

    (resolved, unresolved)
}

fn series_years(config: &FilterConfiguration, ids: &IdSnapshot) -> Vec<i32> {
    let candidates = if config.years().is_empty() {
        ids.years().iter().map(|record| record.year).collect()
    } else {
        config.years().clone()
    };

    candidates
        .into_iter()
        .filter(|year| !config.curated_years_only() || ids.is_curated(*year) == Some(true))
        .collect()
}
