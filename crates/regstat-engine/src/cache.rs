use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use regstat_store::{SqliteStore, Store, StoreError};

use crate::EngineError;

/// A cached value tagged with the data version it was read at.
#[derive(Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub built_in: Duration,
    value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self {
            version,
            built_in: Duration::ZERO,
            value,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Invalidate-then-rebuild-on-next-read cache.
///
/// Readers that arrive while a rebuild is running and call [`Self::peek`] get
/// the previously published value. Publishing swaps a single `Arc`, so no
/// reader ever sees a half-built value.
pub struct VersionedCache<T> {
    name: &'static str,
    current: RwLock<Option<Arc<Versioned<T>>>>,
    invalidated: AtomicBool,
    rebuild_guard: Mutex<()>,
}

impl<T> VersionedCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: RwLock::new(None),
            invalidated: AtomicBool::new(true),
            rebuild_guard: Mutex::new(()),
        }
    }

    /// Last published value, without checking freshness or building.
    pub fn peek(&self) -> Option<Arc<Versioned<T>>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Marks the cached value stale. The rebuild happens on the next read.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Returns the cached value when it matches the store's data version,
    /// otherwise rebuilds it with `build` and publishes the result.
    pub fn get_or_rebuild<F>(
        &self,
        store: &SqliteStore,
        build: F,
    ) -> Result<Arc<Versioned<T>>, EngineError>
    where
        F: Fn(&SqliteStore) -> Result<T, StoreError>,
    {
        let version = store.data_version()?;
        if let Some(cached) = self.fresh(version) {
            return Ok(cached);
        }

        let _guard = self
            .rebuild_guard
            .lock()
            .map_err(|_| EngineError::LockPoisoned(format!("{} rebuild guard", self.name)))?;

        // Another reader may have finished the rebuild while we waited.
        let version = store.data_version()?;
        if let Some(cached) = self.fresh(version) {
            return Ok(cached);
        }

        self.rebuild_locked(store, &build)
    }

    /// Rebuilds unconditionally.
    pub fn rebuild<F>(&self, store: &SqliteStore, build: F) -> Result<Arc<Versioned<T>>, EngineError>
    where
        F: Fn(&SqliteStore) -> Result<T, StoreError>,
    {
        let _guard = self
            .rebuild_guard
            .lock()
            .map_err(|_| EngineError::LockPoisoned(format!("{} rebuild guard", self.name)))?;
        self.rebuild_locked(store, &build)
    }

    fn fresh(&self, version: u64) -> Option<Arc<Versioned<T>>> {
        if self.is_invalidated() {
            return None;
        }
        self.peek().filter(|cached| cached.version == version)
    }

    fn rebuild_locked<F>(
        &self,
        store: &SqliteStore,
        build: &F,
    ) -> Result<Arc<Versioned<T>>, EngineError>
    where
        F: Fn(&SqliteStore) -> Result<T, StoreError>,
    {
        // Cleared before building so an invalidation racing the build is kept.
        self.invalidated.store(false, Ordering::SeqCst);

        let started = Instant::now();
        let (mut version, mut current, mut value) = self.build_once(store, build)?;
        if current != version {
            tracing::warn!(
                cache = self.name,
                built_version = version,
                current_version = current,
                "data changed during cache build, rebuilding once"
            );
            (version, current, value) = self.build_once(store, build)?;
            if current != version {
                // Published under the older version so the next read rebuilds.
                tracing::warn!(
                    cache = self.name,
                    built_version = version,
                    current_version = current,
                    "cache still stale after retry, publishing older snapshot"
                );
            }
        }

        let published = Arc::new(Versioned {
            version,
            built_in: started.elapsed(),
            value,
        });
        match self.current.write() {
            Ok(mut guard) => *guard = Some(Arc::clone(&published)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&published)),
        }

        tracing::info!(
            cache = self.name,
            version,
            elapsed_ms = published.built_in.as_millis() as u64,
            "cache rebuilt"
        );
        Ok(published)
    }

    /// Builds inside one read transaction, returning the version the build
    /// saw and the version current once it finished.
    fn build_once<F>(&self, store: &SqliteStore, build: &F) -> Result<(u64, u64, T), StoreError>
    where
        F: Fn(&SqliteStore) -> Result<T, StoreError>,
    {
        let (built, value) = store.read_snapshot(build)?;
        let current = store.data_version()?;
        Ok((built, current, value))
    }
}
