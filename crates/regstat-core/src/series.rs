use serde::{Deserialize, Serialize};

/// A measured value, or a data point that was measured but has no defined
/// value (for example a percentage over an empty baseline).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PointValue {
    Measured(f64),
    Undefined,
}

impl PointValue {
    pub fn measured(self) -> Option<f64> {
        match self {
            Self::Measured(value) => Some(value),
            Self::Undefined => None,
        }
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Self::Measured(value) => Self::Measured(f(value)),
            Self::Undefined => Self::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub year: i32,
    pub value: PointValue,
}

impl TimeSeriesPoint {
    pub fn measured(year: i32, value: f64) -> Self {
        Self {
            year,
            value: PointValue::Measured(value),
        }
    }

    pub fn undefined(year: i32) -> Self {
        Self {
            year,
            value: PointValue::Undefined,
        }
    }
}
