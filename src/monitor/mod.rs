//! Operation performance monitoring
//!
//! Times arbitrary async operations, aggregates statistics over the
//! completed records, and periodically reports them locally via
//! `tracing` and optionally to a remote sink in batches.

pub mod perf;
pub mod reporter;

pub use perf::{
    AggregateStats, MonitorConfig, OperationId, OperationRecord, OperationType,
    PerformanceMonitor, TypeStats,
};
pub use reporter::format_log_line;
