//! Operation timing primitives
//!
//! An operation is opened with [`PerformanceMonitor::start_operation`],
//! which parks a record in a concurrency-safe in-flight map, and closed
//! with [`PerformanceMonitor::end_operation`], which stamps the duration
//! exactly once and moves the record to the completed buffer. The buffer
//! is drained whenever a report is flushed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::reporter::{format_log_line, RemoteSink};
use crate::errors::DataError;

/// Operations slower than this log a warning by default
const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(300);

/// Default period between reports
const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of log lines per shipped batch
const DEFAULT_BATCH_SIZE: usize = 10;

/// Performance monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Record operations at all; disabled monitors are pass-through
    pub enabled: bool,
    /// Duration above which an operation is flagged as slow
    pub slow_threshold: Duration,
    /// Ship reports and queued log lines to `remote_url`
    pub remote_reporting: bool,
    /// Period between automatic report flushes
    pub reporting_interval: Duration,
    /// Remote sink endpoint
    pub remote_url: Option<String>,
    /// Log lines per shipped batch
    pub batch_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            remote_reporting: false,
            reporting_interval: DEFAULT_REPORTING_INTERVAL,
            remote_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Kind of work an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    DatabaseRead,
    DatabaseWrite,
    NetworkRequest,
    Serialization,
}

impl OperationType {
    /// Stable string form for log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::DatabaseRead => "database_read",
            OperationType::DatabaseWrite => "database_write",
            OperationType::NetworkRequest => "network_request",
            OperationType::Serialization => "serialization",
        }
    }
}

/// Handle to an in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl OperationId {
    /// Sentinel returned by a disabled monitor; ending it is a no-op
    const NOOP: OperationId = OperationId(0);
}

/// One timed unit of work, from start to completion
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: OperationId,
    pub op_type: OperationType,
    pub name: String,
    /// Wall-clock start, unix milliseconds
    pub started_at_ms: u64,
    /// Wall-clock end, unix milliseconds; set exactly once at completion
    pub ended_at_ms: Option<u64>,
    /// Set exactly once at completion; always >= 0
    pub duration_ms: Option<u64>,
    pub success: bool,
    /// Explicit typed context captured at start
    pub parameters: Option<HashMap<String, String>>,
    /// Monotonic start used for the duration computation
    started: Instant,
}

/// Per-operation-type aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub count: usize,
    pub success_count: usize,
    pub avg_duration_ms: f64,
}

/// Statistics derived from the completed buffer at report time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_ops: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub slow_op_count: usize,
    pub per_type: HashMap<OperationType, TypeStats>,
}

pub(super) struct MonitorInner {
    pub(super) config: RwLock<MonitorConfig>,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<OperationId, OperationRecord>>,
    completed: Mutex<Vec<OperationRecord>>,
    pub(super) reporter: Mutex<Option<JoinHandle<()>>>,
    pub(super) sink: RemoteSink,
}

/// Times async operations and aggregates their statistics.
///
/// Cloning is cheap and every clone shares the same state, so one
/// monitor is constructed at process start and handed to every
/// consumer; there is no hidden global instance.
#[derive(Clone)]
pub struct PerformanceMonitor {
    pub(super) inner: Arc<MonitorInner>,
}

impl PerformanceMonitor {
    /// Create a monitor with the given configuration
    pub fn new(config: MonitorConfig) -> Result<Self, DataError> {
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config: RwLock::new(config),
                next_id: AtomicU64::new(0),
                in_flight: Mutex::new(HashMap::new()),
                completed: Mutex::new(Vec::new()),
                reporter: Mutex::new(None),
                sink: RemoteSink::new()?,
            }),
        })
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> MonitorConfig {
        self.inner.config.read().unwrap().clone()
    }

    fn is_enabled(&self) -> bool {
        self.inner.config.read().unwrap().enabled
    }

    /// Open an operation record and return its id.
    ///
    /// # Arguments
    /// * `op_type` - Kind of work being timed
    /// * `name` - Operation name, e.g. `"member.find_by_id"`
    /// * `parameters` - Optional typed context recorded with the operation
    pub fn start_operation(
        &self,
        op_type: OperationType,
        name: &str,
        parameters: Option<HashMap<String, String>>,
    ) -> OperationId {
        if !self.is_enabled() {
            return OperationId::NOOP;
        }

        let id = OperationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = OperationRecord {
            id,
            op_type,
            name: name.to_string(),
            started_at_ms: now_ms(),
            ended_at_ms: None,
            duration_ms: None,
            success: false,
            parameters,
            started: Instant::now(),
        };

        self.inner.in_flight.lock().unwrap().insert(id, record);
        id
    }

    /// Complete an operation, stamping its duration exactly once.
    ///
    /// Unknown ids are logged and ignored, so a double `end_operation`
    /// can never double-count a record or its slow-operation warning.
    pub fn end_operation(&self, id: OperationId, success: bool) {
        if id == OperationId::NOOP {
            return;
        }

        let mut record = match self.inner.in_flight.lock().unwrap().remove(&id) {
            Some(record) => record,
            None => {
                debug!(id = id.0, "end_operation for unknown operation id");
                return;
            }
        };

        let duration = record.started.elapsed();
        record.ended_at_ms = Some(now_ms());
        record.duration_ms = Some(duration.as_millis() as u64);
        record.success = success;

        let config = self.config();
        if duration > config.slow_threshold {
            warn!(
                op_type = record.op_type.as_str(),
                name = %record.name,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = config.slow_threshold.as_millis() as u64,
                "Slow operation"
            );
            if config.remote_reporting {
                let mut context = HashMap::new();
                context.insert("operation".to_string(), record.name.clone());
                context.insert(
                    "durationMs".to_string(),
                    duration.as_millis().to_string(),
                );
                self.inner
                    .sink
                    .enqueue_log(format_log_line("WARN", "slow operation", &context));
            }
        }

        self.inner.completed.lock().unwrap().push(record);
    }

    /// Time an async call: start, await, end with the call's outcome.
    ///
    /// The returned value, success or error, is the call's own,
    /// unmodified.
    pub async fn measure<T, E, F, Fut>(
        &self,
        op_type: OperationType,
        name: &str,
        parameters: Option<HashMap<String, String>>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let id = self.start_operation(op_type, name, parameters);
        let result = f().await;
        self.end_operation(id, result.is_ok());
        result
    }

    /// Aggregate statistics over the current completed buffer
    pub fn aggregate(&self) -> AggregateStats {
        let completed = self.inner.completed.lock().unwrap();
        aggregate_records(&completed, self.config().slow_threshold)
    }

    /// Snapshot of the completed records, for diagnostics and tests
    pub fn measurements(&self) -> Vec<OperationRecord> {
        self.inner.completed.lock().unwrap().clone()
    }

    /// Discard all completed records
    pub fn clear_measurements(&self) {
        self.inner.completed.lock().unwrap().clear();
    }

    /// Drain the completed buffer for a report flush
    pub(super) fn take_completed(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut *self.inner.completed.lock().unwrap())
    }
}

/// Compute aggregate statistics from a record slice
pub(super) fn aggregate_records(
    records: &[OperationRecord],
    slow_threshold: Duration,
) -> AggregateStats {
    let total_ops = records.len();
    let success_count = records.iter().filter(|r| r.success).count();
    let duration_sum: u64 = records.iter().filter_map(|r| r.duration_ms).sum();
    let slow_threshold_ms = slow_threshold.as_millis() as u64;
    let slow_op_count = records
        .iter()
        .filter(|r| r.duration_ms.unwrap_or(0) > slow_threshold_ms)
        .count();

    let mut per_type: HashMap<OperationType, (usize, usize, u64)> = HashMap::new();
    for record in records {
        let entry = per_type.entry(record.op_type).or_insert((0, 0, 0));
        entry.0 += 1;
        if record.success {
            entry.1 += 1;
        }
        entry.2 += record.duration_ms.unwrap_or(0);
    }

    AggregateStats {
        total_ops,
        success_rate: if total_ops == 0 {
            0.0
        } else {
            success_count as f64 / total_ops as f64
        },
        avg_duration_ms: if total_ops == 0 {
            0.0
        } else {
            duration_sum as f64 / total_ops as f64
        },
        slow_op_count,
        per_type: per_type
            .into_iter()
            .map(|(op_type, (count, success_count, sum))| {
                (
                    op_type,
                    TypeStats {
                        count,
                        success_count,
                        avg_duration_ms: sum as f64 / count as f64,
                    },
                )
            })
            .collect(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
