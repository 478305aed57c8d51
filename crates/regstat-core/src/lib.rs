use std::fmt;

use serde::{Deserialize, Serialize};

mod filter;
mod mapping;
mod series;

pub use filter::{
    Attribute, ConfigurationError, CoverageMode, FilterConfiguration, FilterConfigurationBuilder,
    MetricKind, MetricSpec, NumericAttribute,
};
pub use mapping::{
    Assignment, CompletenessStatus, FuelSlot, MappingPair, TripletMapping, WildcardMapping,
    completeness,
};
pub use series::{PointValue, TimeSeriesPoint};

/// Categorical attribute of a registration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Make,
    Model,
    ModelYear,
    FuelType,
    VehicleType,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Make,
        Self::Model,
        Self::ModelYear,
        Self::FuelType,
        Self::VehicleType,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Make => "make",
            Self::Model => "model",
            Self::ModelYear => "model_year",
            Self::FuelType => "fuel_type",
            Self::VehicleType => "vehicle_type",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Make => "Make",
            Self::Model => "Model",
            Self::ModelYear => "ModelYear",
            Self::FuelType => "FuelType",
            Self::VehicleType => "VehicleType",
        }
    }

    /// Whether uncurated rows can be resolved to canonical values for this
    /// dimension through the mapping tables.
    pub fn is_regularizable(self) -> bool {
        !matches!(self, Self::ModelYear)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "make" => Ok(Self::Make),
            "model" => Ok(Self::Model),
            "model_year" | "modelyear" => Ok(Self::ModelYear),
            "fuel_type" | "fueltype" => Ok(Self::FuelType),
            "vehicle_type" | "vehicletype" => Ok(Self::VehicleType),
            other => Err(format!(
                "invalid dimension '{other}', expected one of: make, model, model_year, fuel_type, vehicle_type"
            )),
        }
    }
}

/// Compact integer identifier of an enumeration entry. Ids are assigned once
/// and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
)]
#[serde(transparent)]
pub struct CategoryId(pub i64);

impl CategoryId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub kind: Dimension,
    pub id: CategoryId,
    pub code: String,
    pub display_name: String,
}

/// Registration year as classified by the import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRecord {
    pub id: CategoryId,
    pub year: i32,
    pub curated: bool,
}

/// Normalizes a user-facing category value into the code stored in the
/// enumeration tables.
pub fn normalize_code(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}
