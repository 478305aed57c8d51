use regstat_config::ConfigError;
use regstat_core::ConfigurationError;
use regstat_store::StoreError;
use thiserror::Error;

mod cache;
pub mod compiler;
mod engine;
pub mod hierarchy;
pub mod ids;
mod jobs;
pub mod legend;
mod mapping;
pub mod metrics;
mod options;

pub use cache::{Versioned, VersionedCache};
pub use compiler::{CompiledQuery, Grouping, QueryCompiler, UnresolvedSelection};
pub use engine::{Engine, QueryResult};
pub use hierarchy::{CanonicalHierarchy, CanonicalHierarchyCache, ModelYearNode};
pub use ids::{IdResolutionCache, IdSnapshot};
pub use jobs::{CancelToken, JobHandle};
pub use mapping::MappingStatus;
pub use metrics::SeriesFlags;
pub use options::{CategoryOption, OptionScope};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("job cancelled before it started")]
    Cancelled,
    #[error("background worker failed: {0}")]
    Worker(String),
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
