use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::CategoryId;

/// Review state of a mapped attribute.
///
/// `Unreviewed` and `Unknown` are different answers: the first means nobody
/// has looked at the pair yet, the second means it was reviewed and the value
/// cannot be determined. Completeness reporting depends on keeping them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Assignment<T> {
    Unreviewed,
    Unknown,
    Assigned(T),
}

impl<T> Default for Assignment<T> {
    fn default() -> Self {
        Self::Unreviewed
    }
}

impl<T> Assignment<T> {
    pub fn is_reviewed(&self) -> bool {
        !matches!(self, Self::Unreviewed)
    }

    pub fn assigned(&self) -> Option<&T> {
        match self {
            Self::Assigned(value) => Some(value),
            Self::Unreviewed | Self::Unknown => None,
        }
    }

    pub fn state_str(&self) -> &'static str {
        match self {
            Self::Unreviewed => "unreviewed",
            Self::Unknown => "unknown",
            Self::Assigned(_) => "assigned",
        }
    }
}

impl Assignment<CategoryId> {
    /// Rebuilds an assignment from its persisted `(state, id)` columns.
    /// Returns `None` when the two columns disagree.
    pub fn from_parts(state: &str, id: Option<i64>) -> Option<Self> {
        match (state, id) {
            ("unreviewed", None) => Some(Self::Unreviewed),
            ("unknown", None) => Some(Self::Unknown),
            ("assigned", Some(id)) => Some(Self::Assigned(CategoryId(id))),
            _ => None,
        }
    }

    pub fn to_parts(&self) -> (&'static str, Option<i64>) {
        (self.state_str(), self.assigned().map(|id| id.get()))
    }
}

/// An uncurated (make, model) pair as it appears in raw registration rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct MappingPair {
    pub make: CategoryId,
    pub model: CategoryId,
}

impl MappingPair {
    pub fn new(make: CategoryId, model: CategoryId) -> Self {
        Self { make, model }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardMapping {
    pub pair: MappingPair,
    pub canonical_make: CategoryId,
    pub canonical_model: CategoryId,
    #[serde(default)]
    pub vehicle_type: Assignment<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripletMapping {
    pub pair: MappingPair,
    pub model_year: CategoryId,
    #[serde(default)]
    pub fuel_type: Assignment<CategoryId>,
}

/// Fuel type slot of a curated model year. A model year whose curated rows
/// never record a fuel type still gets a node, holding `Unassigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(tag = "slot", content = "id", rename_all = "snake_case")]
pub enum FuelSlot {
    Unassigned,
    Known(CategoryId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessStatus {
    Unassigned,
    NeedsReview,
    Complete,
}

impl CompletenessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::NeedsReview => "needs_review",
            Self::Complete => "complete",
        }
    }
}

/// Completeness of a mapped pair against the model years its canonical
/// model has in the curated hierarchy.
///
/// A pair is complete only when the vehicle type was reviewed and every
/// expected model year has a reviewed fuel type triplet.
pub fn completeness(
    wildcard: Option<&WildcardMapping>,
    triplets: &[TripletMapping],
    expected_model_years: &BTreeSet<CategoryId>,
) -> CompletenessStatus {
    let Some(wildcard) = wildcard else {
        return CompletenessStatus::Unassigned;
    };

    if !wildcard.vehicle_type.is_reviewed() || expected_model_years.is_empty() {
        return CompletenessStatus::NeedsReview;
    }

    let covering = triplets
        .iter()
        .filter(|triplet| triplet.pair == wildcard.pair)
        .filter(|triplet| expected_model_years.contains(&triplet.model_year))
        .collect::<Vec<_>>();
    let covered_years = covering
        .iter()
        .map(|triplet| triplet.model_year)
        .collect::<BTreeSet<_>>();

    if covered_years.len() != expected_model_years.len()
        || covering.iter().any(|triplet| !triplet.fuel_type.is_reviewed())
    {
        return CompletenessStatus::NeedsReview;
    }

    CompletenessStatus::Complete
}
