use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Dimension;

/// A filter configuration that cannot be compiled. Carries the offending
/// field so callers can point at it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter configuration: {field}: {reason}")]
pub struct ConfigurationError {
    pub field: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum NumericAttribute {
    NetMass,
    Displacement,
    CylinderCount,
}

impl NumericAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetMass => "net_mass",
            Self::Displacement => "displacement",
            Self::CylinderCount => "cylinder_count",
        }
    }
}

/// Any attribute whose presence can be measured by a coverage metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Make,
    Model,
    ModelYear,
    FuelType,
    VehicleType,
    NetMass,
    Displacement,
    CylinderCount,
}

impl Attribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Make => "make",
            Self::Model => "model",
            Self::ModelYear => "model_year",
            Self::FuelType => "fuel_type",
            Self::VehicleType => "vehicle_type",
            Self::NetMass => "net_mass",
            Self::Displacement => "displacement",
            Self::CylinderCount => "cylinder_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// Percentage of rows where the attribute is present.
    #[default]
    NonNull,
    /// Number of rows where the attribute is missing.
    NullCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    Count,
    Sum {
        attribute: NumericAttribute,
    },
    Average {
        attribute: NumericAttribute,
    },
    /// Row count as a percentage of the same query with one dimension's
    /// selection dropped.
    Percentage {
        #[serde(default)]
        baseline_dimension: Option<Dimension>,
    },
    Coverage {
        attribute: Attribute,
        #[serde(default)]
        mode: CoverageMode,
    },
    /// Sum of the fourth power of a load attribute, weighted per vehicle
    /// category by its axle load profile.
    PhysicalIndex {
        attribute: NumericAttribute,
    },
}

impl MetricKind {
    pub fn label(&self) -> String {
        match self {
            Self::Count => "Count".to_owned(),
            Self::Sum { attribute } => format!("Sum({})", attribute.as_str()),
            Self::Average { attribute } => format!("Average({})", attribute.as_str()),
            Self::Percentage { baseline_dimension } => match baseline_dimension {
                Some(dimension) => format!("Percentage of all {}", dimension.label()),
                None => "Percentage".to_owned(),
            },
            Self::Coverage {
                attribute,
                mode: CoverageMode::NonNull,
            } => format!("Coverage({})", attribute.as_str()),
            Self::Coverage {
                attribute,
                mode: CoverageMode::NullCount,
            } => format!("Missing({})", attribute.as_str()),
            Self::PhysicalIndex { attribute } => {
                format!("PhysicalIndex({})", attribute.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricSpec {
    #[serde(flatten)]
    pub kind: MetricKind,
    #[serde(default)]
    pub normalize_to_first: bool,
    #[serde(default)]
    pub cumulative: bool,
}

impl MetricSpec {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            normalize_to_first: false,
            cumulative: false,
        }
    }

    pub fn count() -> Self {
        Self::new(MetricKind::Count)
    }

    pub fn with_normalization(mut self) -> Self {
        self.normalize_to_first = true;
        self
    }

    pub fn with_cumulative(mut self) -> Self {
        self.cumulative = true;
        self
    }
}

/// What a caller asks the engine to measure. Immutable once built; start a
/// new builder for a different query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfiguration {
    #[serde(default)]
    years: BTreeSet<i32>,
    #[serde(default)]
    selections: BTreeMap<Dimension, BTreeSet<String>>,
    metric: MetricSpec,
    #[serde(default)]
    regularization_enabled: bool,
    #[serde(default)]
    curated_years_only: bool,
}

impl FilterConfiguration {
    pub fn builder(metric: MetricSpec) -> FilterConfigurationBuilder {
        FilterConfigurationBuilder {
            inner: Self {
                years: BTreeSet::new(),
                selections: BTreeMap::new(),
                metric,
                regularization_enabled: false,
                curated_years_only: false,
            },
        }
    }

    /// Selected registration years. Empty means every year.
    pub fn years(&self) -> &BTreeSet<i32> {
        &self.years
    }

    pub fn selections(&self) -> impl Iterator<Item = (Dimension, &BTreeSet<String>)> {
        self.selections
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(dimension, values)| (*dimension, values))
    }

    pub fn selection(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.selections
            .get(&dimension)
            .filter(|values| !values.is_empty())
    }

    pub fn metric(&self) -> &MetricSpec {
        &self.metric
    }

    /// The raw toggle as submitted. Use [`Self::regularization_effective`] to
    /// decide whether regularization applies.
    pub fn regularization_enabled(&self) -> bool {
        self.regularization_enabled
    }

    pub fn curated_years_only(&self) -> bool {
        self.curated_years_only
    }

    /// Regularization only ever applies to uncurated years, so it is a no-op
    /// for curated-only queries.
    pub fn regularization_effective(&self) -> bool {
        self.regularization_enabled && !self.curated_years_only
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (dimension, values) in &self.selections {
            if values.iter().any(|value| value.trim().is_empty()) {
                return Err(ConfigurationError::new(
                    format!("selections.{}", dimension.as_str()),
                    "selection contains an empty value",
                ));
            }
        }

        if let MetricKind::Percentage { baseline_dimension } = self.metric.kind {
            let Some(dimension) = baseline_dimension else {
                return Err(ConfigurationError::new(
                    "metric.baseline_dimension",
                    "percentage metric requires a baseline dimension to drop",
                ));
            };
            if self.selection(dimension).is_none() {
                return Err(ConfigurationError::new(
                    "metric.baseline_dimension",
                    format!(
                        "baseline dimension '{}' has no selection to drop",
                        dimension.as_str()
                    ),
                ));
            }
        }

        Ok(())
    }
}

pub struct FilterConfigurationBuilder {
    inner: FilterConfiguration,
}

impl FilterConfigurationBuilder {
    pub fn years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.inner.years.extend(years);
        self
    }

    pub fn select<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.inner.selections.entry(dimension).or_default();
        entry.extend(values.into_iter().map(|value| value.into().trim().to_owned()));
        self
    }

    pub fn regularization(mut self, enabled: bool) -> Self {
        self.inner.regularization_enabled = enabled;
        self
    }

    pub fn curated_years_only(mut self, enabled: bool) -> Self {
        self.inner.curated_years_only = enabled;
        self
    }

    /// Validates and freezes the configuration. Requesting curated years only
    /// switches regularization off, mirroring the disabled toggle in a UI.
    pub fn build(mut self) -> Result<FilterConfiguration, ConfigurationError> {
        if self.inner.curated_years_only {
            self.inner.regularization_enabled = false;
        }
        self.inner.selections.retain(|_, values| !values.is_empty());
        self.inner.validate()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_gates_regularization_off_for_curated_years_only() {
        let config = FilterConfiguration::builder(MetricSpec::count())
            .regularization(true)
            .curated_years_only(true)
            .build()
            .expect("build config");

        assert!(!config.regularization_enabled());
        assert!(!config.regularization_effective());
    }

    #[test]
    fn deserialized_config_keeps_raw_flags_but_is_not_effective() {
        let raw = r#"{
            "selections": {"make": ["NOVA"]},
            "metric": {"kind": "count"},
            "regularization_enabled": true,
            "curated_years_only": true
        }"#;
        let config: FilterConfiguration = serde_json::from_str(raw).expect("parse config");

        assert!(config.regularization_enabled());
        assert!(config.curated_years_only());
        assert!(!config.regularization_effective());
    }

    #[test]
    fn percentage_without_baseline_dimension_is_rejected() {
        let error = FilterConfiguration::builder(MetricSpec::new(MetricKind::Percentage {
            baseline_dimension: None,
        }))
        .select(Dimension::Make, ["HONDA"])
        .build()
        .expect_err("percentage without baseline must fail");

        assert_eq!(error.field, "metric.baseline_dimension");
    }

    #[test]
    fn percentage_baseline_must_drop_an_existing_selection() {
        let error = FilterConfiguration::builder(MetricSpec::new(MetricKind::Percentage {
            baseline_dimension: Some(Dimension::FuelType),
        }))
        .select(Dimension::Make, ["HONDA"])
        .build()
        .expect_err("baseline without selection must fail");
        assert!(error.reason.contains("fuel_type"));

        let config = FilterConfiguration::builder(MetricSpec::new(MetricKind::Percentage {
            baseline_dimension: Some(Dimension::Make),
        }))
        .select(Dimension::Make, ["HONDA"])
        .build()
        .expect("valid percentage config");
        assert_eq!(config.selection(Dimension::Make).map(BTreeSet::len), Some(1));
    }

    #[test]
    fn blank_selection_values_are_rejected() {
        let raw = r#"{
            "selections": {"model": ["CIVIC", "  "]},
            "metric": {"kind": "count"}
        }"#;
        let config: FilterConfiguration = serde_json::from_str(raw).expect("parse config");
        let error = config.validate().expect_err("blank value");
        assert_eq!(error.field, "selections.model");
    }

    #[test]
    fn empty_selection_sets_do_not_count_as_constraints() {
        let config = FilterConfiguration::builder(MetricSpec::count())
            .select(Dimension::Make, Vec::<String>::new())
            .build()
            .expect("build config");
        assert!(config.selection(Dimension::Make).is_none());
        assert_eq!(config.selections().count(), 0);
    }
}
