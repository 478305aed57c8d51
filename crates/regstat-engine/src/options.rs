use std::collections::BTreeSet;

use regstat_core::{CategoryId, Dimension};
use regstat_store::{SqliteStore, Store};
use serde::{Deserialize, Serialize};

use crate::EngineError;
use crate::ids::IdSnapshot;

/// Scope of a dropdown request. The same scope rules apply to every
/// dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionScope {
    /// Only offer values present in rows of curated years.
    #[serde(default)]
    pub curated_only: bool,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryOption {
    pub id: CategoryId,
    pub code: String,
    pub display_name: String,
    /// Whether the value exists in curated data.
    pub curated: bool,
}

pub(crate) fn options(
    store: &SqliteStore,
    ids: &IdSnapshot,
    dimension: Dimension,
    scope: &OptionScope,
) -> Result<Vec<CategoryOption>, EngineError> {
    let Some(make) = resolve_scope(ids, Dimension::Make, scope.make.as_deref()) else {
        return Ok(Vec::new());
    };
    let Some(model) = resolve_scope(ids, Dimension::Model, scope.model.as_deref()) else {
        return Ok(Vec::new());
    };

    let curated: BTreeSet<CategoryId> = store
        .distinct_values(dimension, make, model, true)?
        .into_iter()
        .collect();
    let mut values = curated.clone();
    if !scope.curated_only {
        values.extend(store.distinct_values(dimension, make, model, false)?);
    }

    let mut options = values
        .into_iter()
        .filter_map(|id| {
            let entity = ids.entity(dimension, id)?;
            Some(CategoryOption {
                id,
                code: entity.code.clone(),
                display_name: entity.display_name.clone(),
                curated: curated.contains(&id),
            })
        })
        .collect::<Vec<_>>();
    options.sort_by(|left, right| left.code.cmp(&right.code));

    Ok(options)
}

/// `Some(None)` for no scope, `None` for a scope value that matches nothing.
fn resolve_scope(
    ids: &IdSnapshot,
    dimension: Dimension,
    value: Option<&str>,
) -> Option<Option<CategoryId>> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => ids.resolve(dimension, value).map(Some),
        None => Some(None),
    }
}
