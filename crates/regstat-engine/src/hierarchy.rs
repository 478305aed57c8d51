//! Canonical Make → Model → ModelYear tree derived from curated years.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regstat_core::{CategoryId, FuelSlot};
use regstat_store::{HierarchyRow, SqliteStore, Store, StoreError};
use serde::Serialize;

use crate::EngineError;
use crate::cache::{Versioned, VersionedCache};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelYearNode {
    /// Never empty: a model year with no recorded fuel type holds
    /// `FuelSlot::Unassigned`.
    pub fuel_types: BTreeSet<FuelSlot>,
    pub vehicle_types: BTreeSet<CategoryId>,
    pub rows: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelNode {
    pub model_years: BTreeMap<CategoryId, ModelYearNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MakeNode {
    pub models: BTreeMap<CategoryId, ModelNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalHierarchy {
    makes: BTreeMap<CategoryId, MakeNode>,
    skipped_rows: i64,
}

impl CanonicalHierarchy {
    pub fn build(store: &impl Store) -> Result<Self, StoreError> {
        Ok(Self::from_rows(&store.curated_hierarchy_rows()?))
    }

    pub fn from_rows(rows: &[HierarchyRow]) -> Self {
        let mut hierarchy = Self::default();

        for row in rows {
            let (Some(make), Some(model), Some(model_year)) = (row.make, row.model, row.model_year)
            else {
                hierarchy.skipped_rows += row.rows;
                continue;
            };

            // Register the triple first; fuel type is optional detail below it.
            let node = hierarchy
                .makes
                .entry(make)
                .or_default()
                .models
                .entry(model)
                .or_default()
                .model_years
                .entry(model_year)
                .or_default();
            node.rows += row.rows;

            match row.fuel_type {
                Some(fuel_type) => node.fuel_types.insert(FuelSlot::Known(fuel_type)),
                None => node.fuel_types.insert(FuelSlot::Unassigned),
            };
            if let Some(vehicle_type) = row.vehicle_type {
                node.vehicle_types.insert(vehicle_type);
            }
        }

        hierarchy
    }

    pub fn makes(&self) -> &BTreeMap<CategoryId, MakeNode> {
        &self.makes
    }

    pub fn make(&self, make: CategoryId) -> Option<&MakeNode> {
        self.makes.get(&make)
    }

    pub fn model(&self, make: CategoryId, model: CategoryId) -> Option<&ModelNode> {
        self.makes.get(&make)?.models.get(&model)
    }

    pub fn contains_model(&self, make: CategoryId, model: CategoryId) -> bool {
        self.model(make, model).is_some()
    }

    /// Model years the canonical model has in curated data. Empty when the
    /// pair is not part of the hierarchy.
    pub fn model_years_for(&self, make: CategoryId, model: CategoryId) -> BTreeSet<CategoryId> {
        self.model(make, model)
            .map(|node| node.model_years.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn model_year(
        &self,
        make: CategoryId,
        model: CategoryId,
        model_year: CategoryId,
    ) -> Option<&ModelYearNode> {
        self.model(make, model)?.model_years.get(&model_year)
    }

    /// Rows without make, model or model year. They cannot be placed in the
    /// tree and are only counted.
    pub fn skipped_rows(&self) -> i64 {
        self.skipped_rows
    }

    pub fn model_year_count(&self) -> usize {
        self.makes
            .values()
            .flat_map(|make| make.models.values())
            .map(|model| model.model_years.len())
            .sum()
    }
}

/// Owns the published hierarchy snapshot. Built lazily on the first read after
/// an invalidation or a data version change.
pub struct CanonicalHierarchyCache {
    cache: VersionedCache<CanonicalHierarchy>,
}

impl Default for CanonicalHierarchyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalHierarchyCache {
    pub fn new() -> Self {
        Self {
            cache: VersionedCache::new("canonical_hierarchy"),
        }
    }

    pub fn hierarchy(
        &self,
        store: &SqliteStore,
    ) -> Result<Arc<Versioned<CanonicalHierarchy>>, EngineError> {
        let hierarchy = self.cache.get_or_rebuild(store, build_logged)?;
        Ok(hierarchy)
    }

    pub fn rebuild(
        &self,
        store: &SqliteStore,
    ) -> Result<Arc<Versioned<CanonicalHierarchy>>, EngineError> {
        self.cache.rebuild(store, build_logged)
    }

    pub fn peek(&self) -> Option<Arc<Versioned<CanonicalHierarchy>>> {
        self.cache.peek()
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn is_invalidated(&self) -> bool {
        self.cache.is_invalidated()
    }

    pub fn model_years_for(
        &self,
        store: &SqliteStore,
        make: CategoryId,
        model: CategoryId,
    ) -> Result<BTreeSet<CategoryId>, EngineError> {
        Ok(self.hierarchy(store)?.model_years_for(make, model))
    }
}

fn build_logged(store: &SqliteStore) -> Result<CanonicalHierarchy, StoreError> {
    let hierarchy = CanonicalHierarchy::build(store)?;
    tracing::debug!(
        makes = hierarchy.makes.len(),
        model_years = hierarchy.model_year_count(),
        skipped_rows = hierarchy.skipped_rows,
        "built canonical hierarchy"
    );
    Ok(hierarchy)
}
