use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regstat_config::{RegstatConfig, WeightProfileTable, database_path, load_workspace_config};
use regstat_core::{
    CategoryId, Dimension, FilterConfiguration, MappingPair, TimeSeriesPoint, TripletMapping,
    WildcardMapping, YearRecord,
};
use regstat_store::{
    AggregateRow, RegistrationRecord, RegularizationStore, SqliteStore, Store, StoreError,
};
use serde::Serialize;

use crate::cache::Versioned;
use crate::compiler::{CompiledQuery, QueryCompiler, UnresolvedSelection};
use crate::hierarchy::{CanonicalHierarchy, CanonicalHierarchyCache};
use crate::ids::{IdResolutionCache, IdSnapshot};
use crate::jobs::{CancelToken, JobHandle};
use crate::mapping::{MappingStatus, mapping_status, status_of, validate_triplet, validate_wildcard};
use crate::metrics::{self, SeriesFlags};
use crate::options::{CategoryOption, OptionScope, options};
use crate::{EngineError, legend};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub points: Vec<TimeSeriesPoint>,
    pub legend: String,
    pub flags: SeriesFlags,
    pub unresolved: Vec<UnresolvedSelection>,
    pub regularization_applied: bool,
    pub data_version: u64,
}

/// Entry point for hosts. Cheap to clone; clones share the store connection
/// and both caches.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    workspace: PathBuf,
    db_path: PathBuf,
    busy_timeout: Duration,
    config: RegstatConfig,
    weights: WeightProfileTable,
    compiler: QueryCompiler,
    store: Mutex<SqliteStore>,
    hierarchy: CanonicalHierarchyCache,
    ids: IdResolutionCache,
    write_lock: Mutex<()>,
}

type PrimaryAndBaseline = (Vec<AggregateRow>, Option<Vec<AggregateRow>>);

impl Engine {
    pub fn open(workspace: impl AsRef<Path>) -> Result<Self, EngineError> {
        let workspace = workspace.as_ref();
        let config = load_workspace_config(workspace)?;
        Self::with_config(workspace, config)
    }

    pub fn with_config(
        workspace: impl AsRef<Path>,
        config: RegstatConfig,
    ) -> Result<Self, EngineError> {
        let workspace = workspace.as_ref().to_path_buf();
        let weights = WeightProfileTable::from_config(&config.metrics)?;
        let db_path = database_path(&workspace, &config);
        let busy_timeout = Duration::from_millis(config.storage.busy_timeout_ms);
        let store = SqliteStore::open_path(&db_path, busy_timeout)?;

        tracing::info!(
            workspace = %workspace.display(),
            database = %db_path.display(),
            weight_profiles = weights.len(),
            "opened regstat engine"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                compiler: QueryCompiler::new(config.metrics.reference_load),
                workspace,
                db_path,
                busy_timeout,
                config,
                weights,
                store: Mutex::new(store),
                hierarchy: CanonicalHierarchyCache::new(),
                ids: IdResolutionCache::new(),
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.inner.workspace
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn config(&self) -> &RegstatConfig {
        &self.inner.config
    }

    pub fn run_query(&self, config: &FilterConfiguration) -> Result<QueryResult, EngineError> {
        let store = self.store()?;
        self.run_query_on(&store, config)
    }

    pub fn compile(&self, config: &FilterConfiguration) -> Result<CompiledQuery, EngineError> {
        let store = self.store()?;
        let ids = self.inner.ids.snapshot(&store)?;
        self.inner.compiler.compile(config, &ids)
    }

    pub fn hierarchy(&self) -> Result<Arc<Versioned<CanonicalHierarchy>>, EngineError> {
        let store = self.store()?;
        self.inner.hierarchy.hierarchy(&store)
    }

    /// Last published hierarchy without building. `None` before the first
    /// build.
    pub fn peek_hierarchy(&self) -> Option<Arc<Versioned<CanonicalHierarchy>>> {
        self.inner.hierarchy.peek()
    }

    pub fn id_snapshot(&self) -> Result<Arc<Versioned<IdSnapshot>>, EngineError> {
        let store = self.store()?;
        self.inner.ids.snapshot(&store)
    }

    pub fn model_years_for(
        &self,
        make: CategoryId,
        model: CategoryId,
    ) -> Result<BTreeSet<CategoryId>, EngineError> {
        let store = self.store()?;
        self.inner.hierarchy.model_years_for(&store, make, model)
    }

    /// Resolves a code or display name, failing when it is unknown.
    pub fn resolve(&self, dimension: Dimension, value: &str) -> Result<CategoryId, EngineError> {
        self.id_snapshot()?
            .resolve(dimension, value)
            .ok_or_else(|| {
                EngineError::InvalidMapping(format!("unknown {} '{}'", dimension.as_str(), value))
            })
    }

    pub fn options(
        &self,
        dimension: Dimension,
        scope: &OptionScope,
    ) -> Result<Vec<CategoryOption>, EngineError> {
        let store = self.store()?;
        let ids = self.inner.ids.snapshot(&store)?;
        options(&store, &ids, dimension, scope)
    }

    pub fn set_year_curated(&self, year: i32, curated: bool) -> Result<YearRecord, EngineError> {
        self.write(|store| Ok(store.set_year_curated(year, curated)?))
    }

    /// Import interface: writes one batch of raw rows.
    pub fn record_batch(&self, rows: &[RegistrationRecord]) -> Result<usize, EngineError> {
        self.write(|store| Ok(store.insert_registrations(rows)?))
    }

    pub fn ensure_category(
        &self,
        dimension: Dimension,
        code: &str,
        display_name: Option<&str>,
    ) -> Result<CategoryId, EngineError> {
        self.write(|store| Ok(store.ensure_category(dimension, code, display_name)?))
    }

    /// For writes made outside this engine, e.g. by another process.
    pub fn notify_data_changed(&self) {
        self.invalidate_caches();
    }

    pub fn mapping_status(&self, pair: MappingPair) -> Result<MappingStatus, EngineError> {
        let store = self.store()?;
        let hierarchy = self.inner.hierarchy.hierarchy(&store)?;
        mapping_status(&store, &hierarchy, pair)
    }

    /// Mappings whose own vehicle type matches, or all of them.
    pub fn list_mappings(
        &self,
        vehicle_type: Option<CategoryId>,
    ) -> Result<Vec<MappingStatus>, EngineError> {
        let store = self.store()?;
        let hierarchy = self.inner.hierarchy.hierarchy(&store)?;
        store
            .all_pairs_matching(vehicle_type)?
            .into_iter()
            .map(|wildcard| -> Result<MappingStatus, EngineError> {
                let triplets = store.list_triplets(wildcard.pair)?;
                Ok(status_of(&hierarchy, wildcard.pair, Some(wildcard), triplets))
            })
            .collect()
    }

    pub fn upsert_wildcard(&self, mapping: &WildcardMapping) -> Result<MappingStatus, EngineError> {
        let pruned = self.write(|store| {
            let hierarchy = self.inner.hierarchy.hierarchy(store)?;
            let ids = self.inner.ids.snapshot(store)?;
            validate_wildcard(&hierarchy, &ids, mapping)?;
            let target_years =
                hierarchy.model_years_for(mapping.canonical_make, mapping.canonical_model);
            Ok(store.upsert_wildcard(mapping, &target_years)?)
        })?;
        tracing::info!(
            make = %mapping.pair.make,
            model = %mapping.pair.model,
            vehicle_type = mapping.vehicle_type.state_str(),
            pruned_triplets = pruned,
            "upserted wildcard mapping"
        );
        self.mapping_status(mapping.pair)
    }

    pub fn upsert_triplet(&self, triplet: &TripletMapping) -> Result<MappingStatus, EngineError> {
        self.write(|store| {
            let hierarchy = self.inner.hierarchy.hierarchy(store)?;
            let ids = self.inner.ids.snapshot(store)?;
            let wildcard = store.get_mapping(triplet.pair)?;
            validate_triplet(&hierarchy, &ids, wildcard.as_ref(), triplet)?;
            store.upsert_triplet(triplet)?;
            Ok(())
        })?;
        tracing::info!(
            make = %triplet.pair.make,
            model = %triplet.pair.model,
            model_year = %triplet.model_year,
            fuel_type = triplet.fuel_type.state_str(),
            "upserted triplet mapping"
        );
        self.mapping_status(triplet.pair)
    }

    pub fn delete_mapping(&self, pair: MappingPair) -> Result<bool, EngineError> {
        self.write(|store| Ok(store.delete_mapping(pair)?))
    }

    pub fn spawn_query(
        &self,
        config: FilterConfiguration,
    ) -> Result<JobHandle<QueryResult>, EngineError> {
        self.spawn_query_with(CancelToken::new(), config)
    }

    /// Runs a query on its own connection. Cancelling `token` before the job
    /// opens that connection makes it return [`EngineError::Cancelled`].
    pub fn spawn_query_with(
        &self,
        token: CancelToken,
        config: FilterConfiguration,
    ) -> Result<JobHandle<QueryResult>, EngineError> {
        let engine = self.clone();
        JobHandle::spawn("query", token, move |token| {
            token.check()?;
            let store = engine.open_connection()?;
            engine.run_query_on(&store, &config)
        })
    }

    pub fn spawn_hierarchy_rebuild(
        &self,
        token: CancelToken,
    ) -> Result<JobHandle<Arc<Versioned<CanonicalHierarchy>>>, EngineError> {
        let engine = self.clone();
        JobHandle::spawn("hierarchy", token, move |token| {
            let store = engine.open_connection()?;
            // Last point of cancellation; the build publishes atomically.
            token.check()?;
            engine.inner.hierarchy.rebuild(&store)
        })
    }

    fn run_query_on(
        &self,
        store: &SqliteStore,
        config: &FilterConfiguration,
    ) -> Result<QueryResult, EngineError> {
        let mut ids = self.inner.ids.snapshot(store)?;
        let mut compiled = self.inner.compiler.compile(config, &ids)?;
        let (mut observed, mut rows) = execute(store, &compiled)?;

        if observed != compiled.data_version {
            tracing::warn!(
                compiled_version = compiled.data_version,
                observed_version = observed,
                "data changed between compile and execute, retrying once"
            );
            self.inner.ids.invalidate();
            ids = self.inner.ids.snapshot(store)?;
            compiled = self.inner.compiler.compile(config, &ids)?;
            (observed, rows) = execute(store, &compiled)?;
            if observed != compiled.data_version {
                tracing::warn!(
                    compiled_version = compiled.data_version,
                    observed_version = observed,
                    "data still changing, returning result of the retry"
                );
            }
        }

        let (primary, baseline) = rows;
        let wear_factor = |category: Option<CategoryId>| {
            let code = category.and_then(|id| ids.code(Dimension::VehicleType, id));
            self.inner.weights.profile_for(code).wear_factor()
        };
        let raw = metrics::aggregate(
            &compiled.metric.kind,
            &primary,
            baseline.as_deref(),
            &compiled.series_years,
            &wear_factor,
        );
        let (points, flags) = metrics::apply(&compiled.metric, raw);
        let legend = legend::describe(config, &compiled, &ids);

        tracing::debug!(
            points = points.len(),
            legend = %legend,
            data_version = observed,
            "query finished"
        );

        Ok(QueryResult {
            points,
            legend,
            flags,
            unresolved: compiled.unresolved,
            regularization_applied: compiled.regularization_applied,
            data_version: observed,
        })
    }

    /// Runs a store write under the engine's write lock and invalidates both
    /// caches before the lock is released, also when the write failed.
    fn write<T>(
        &self,
        action: impl FnOnce(&SqliteStore) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let _write = self
            .inner
            .write_lock
            .lock()
            .map_err(|_| EngineError::LockPoisoned("engine write lock".to_owned()))?;
        let store = self.store()?;
        let result = action(&store);
        self.invalidate_caches();
        result
    }

    fn invalidate_caches(&self) {
        self.inner.hierarchy.invalidate();
        self.inner.ids.invalidate();
        tracing::debug!("invalidated hierarchy and id caches");
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStore>, EngineError> {
        self.inner
            .store
            .lock()
            .map_err(|_| EngineError::LockPoisoned("sqlite store".to_owned()))
    }

    fn open_connection(&self) -> Result<SqliteStore, EngineError> {
        Ok(SqliteStore::open_path(
            &self.inner.db_path,
            self.inner.busy_timeout,
        )?)
    }
}

/// Runs the primary and baseline queries in one read transaction and returns
/// the data version that transaction saw.
fn execute(
    store: &SqliteStore,
    compiled: &CompiledQuery,
) -> Result<(u64, PrimaryAndBaseline), EngineError> {
    let result = store.read_snapshot(|store| -> Result<PrimaryAndBaseline, StoreError> {
        let primary = store.aggregate(&compiled.primary)?;
        let baseline = match &compiled.baseline {
            Some(query) => Some(store.aggregate(query)?),
            None => None,
        };
        Ok((primary, baseline))
    })?;
    Ok(result)
}
