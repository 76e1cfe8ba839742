//! Crewdeck data layer - caching and instrumentation infrastructure
//!
//! Serves the app's domain reads through a namespaced, versioned TTL
//! cache with single-flight loading, times every data operation through
//! a performance monitor with periodic (optionally remote) reporting,
//! and composes both into instrumented repositories consumed by the UI
//! layer.
//!
//! Services are constructed explicitly at process start and passed to
//! their consumers; nothing in this crate is a process-wide singleton.

pub mod cache;
pub mod errors;
pub mod monitor;
pub mod repo;
pub mod storage;

pub use cache::{CacheOptions, CacheOptionsUpdate, CacheService};
pub use errors::{DataError, StrategyFailure};
pub use monitor::{
    AggregateStats, MonitorConfig, OperationId, OperationRecord, OperationType,
    PerformanceMonitor, TypeStats,
};
pub use repo::{Member, MemberEvent, MemberFetchStrategy, MemberRepository, MemberRole, MemberStore};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
