use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regstat_core::{CanonicalEntity, CategoryId, Dimension, YearRecord, normalize_code};
use regstat_store::{SqliteStore, Store, StoreError};

use crate::EngineError;
use crate::cache::{Versioned, VersionedCache};

/// Code ↔ id view of the enumeration tables and the year table at one data
/// version.
#[derive(Debug, Clone, Default)]
pub struct IdSnapshot {
    by_code: HashMap<(Dimension, String), CategoryId>,
    by_display: HashMap<(Dimension, String), CategoryId>,
    entities: BTreeMap<(Dimension, CategoryId), CanonicalEntity>,
    years: Vec<YearRecord>,
}

impl IdSnapshot {
    pub fn load(store: &impl Store) -> Result<Self, StoreError> {
        let mut snapshot = Self::default();
        for dimension in Dimension::ALL {
            for entity in store.list_categories(dimension)? {
                snapshot.insert(entity);
            }
        }
        snapshot.years = store.list_years()?;
        Ok(snapshot)
    }

    pub fn from_parts(entities: Vec<CanonicalEntity>, years: Vec<YearRecord>) -> Self {
        let mut snapshot = Self {
            years,
            ..Self::default()
        };
        for entity in entities {
            snapshot.insert(entity);
        }
        snapshot
    }

    fn insert(&mut self, entity: CanonicalEntity) {
        self.by_code
            .insert((entity.kind, entity.code.clone()), entity.id);
        self.by_display
            .entry((entity.kind, normalize_code(&entity.display_name)))
            .or_insert(entity.id);
        self.entities.insert((entity.kind, entity.id), entity);
    }

    /// Resolves a user-facing value by code first, then by display name.
    pub fn resolve(&self, dimension: Dimension, value: &str) -> Option<CategoryId> {
        let key = (dimension, normalize_code(value));
        self.by_code
            .get(&key)
            .or_else(|| self.by_display.get(&key))
            .copied()
    }

    pub fn entity(&self, dimension: Dimension, id: CategoryId) -> Option<&CanonicalEntity> {
        self.entities.get(&(dimension, id))
    }

    pub fn code(&self, dimension: Dimension, id: CategoryId) -> Option<&str> {
        self.entity(dimension, id).map(|entity| entity.code.as_str())
    }

    pub fn display_name(&self, dimension: Dimension, id: CategoryId) -> String {
        self.entity(dimension, id)
            .map(|entity| entity.display_name.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }

    pub fn years(&self) -> &[YearRecord] {
        &self.years
    }

    pub fn is_curated(&self, year: i32) -> Option<bool> {
        self.years
            .iter()
            .find(|record| record.year == year)
            .map(|record| record.curated)
    }
}

pub struct IdResolutionCache {
    cache: VersionedCache<IdSnapshot>,
}

impl Default for IdResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdResolutionCache {
    pub fn new() -> Self {
        Self {
            cache: VersionedCache::new("id_resolution"),
        }
    }

    pub fn snapshot(&self, store: &SqliteStore) -> Result<Arc<Versioned<IdSnapshot>>, EngineError> {
        self.cache
            .get_or_rebuild(store, |store| IdSnapshot::load(store))
    }

    pub fn peek(&self) -> Option<Arc<Versioned<IdSnapshot>>> {
        self.cache.peek()
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn is_invalidated(&self) -> bool {
        self.cache.is_invalidated()
    }
}
