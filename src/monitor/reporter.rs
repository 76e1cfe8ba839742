//! Periodic reporting and remote shipping
//!
//! A cancellable interval task flushes the monitor's completed buffer:
//! the aggregate is logged locally and, when remote reporting is on,
//! queued for delivery to the configured endpoint along with any queued
//! log lines. Transport failures requeue the unsent payload at the front
//! so the next trigger retries it; nothing is surfaced to application
//! callers.
//!
//! Both pending queues are bounded, dropping the oldest entry when full.
//! Sustained transport failure therefore costs bounded memory and the
//! freshest telemetry survives.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Level};

use super::perf::{aggregate_records, AggregateStats, MonitorConfig, PerformanceMonitor};
use crate::errors::DataError;

/// HTTP client timeout for report shipping
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum queued performance reports awaiting delivery
const MAX_PENDING_STATS: usize = 256;

/// Maximum queued log lines awaiting delivery
const MAX_PENDING_LOGS: usize = 1_000;

/// Format one log line for shipping:
/// `"[timestamp] LEVEL: message | {json-context}"`.
///
/// The context is an explicit typed key/value map, so nothing is lost to
/// ad-hoc stringification of arbitrary objects.
pub fn format_log_line(level: &str, message: &str, context: &HashMap<String, String>) -> String {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let ctx = serde_json::to_string(context).unwrap_or_default();
    format!("[{}] {}: {} | {}", timestamp, level, message, ctx)
}

/// Queues of telemetry awaiting remote delivery
pub(super) struct RemoteSink {
    http: reqwest::Client,
    pending_stats: Mutex<VecDeque<AggregateStats>>,
    pending_logs: Mutex<VecDeque<String>>,
}

impl RemoteSink {
    pub(super) fn new() -> Result<Self, DataError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DataError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            pending_stats: Mutex::new(VecDeque::new()),
            pending_logs: Mutex::new(VecDeque::new()),
        })
    }

    pub(super) fn enqueue_stats(&self, stats: AggregateStats) {
        let mut pending = self.pending_stats.lock().unwrap();
        if pending.len() >= MAX_PENDING_STATS {
            pending.pop_front();
            warn!("Pending report queue full, dropping oldest report");
        }
        pending.push_back(stats);
    }

    pub(super) fn enqueue_log(&self, line: String) {
        let mut pending = self.pending_logs.lock().unwrap();
        if pending.len() >= MAX_PENDING_LOGS {
            pending.pop_front();
            warn!("Pending log queue full, dropping oldest line");
        }
        pending.push_back(line);
    }

    pub(super) fn pending_log_count(&self) -> usize {
        self.pending_logs.lock().unwrap().len()
    }

    pub(super) fn pending_stats_count(&self) -> usize {
        self.pending_stats.lock().unwrap().len()
    }

    /// Ship everything pending: stats objects first, then log lines in
    /// `batch_size` batches. Stops at the first transport failure after
    /// requeuing the unsent payload at the front.
    pub(super) async fn flush(&self, remote_url: &str, batch_size: usize) {
        loop {
            let stats = self.pending_stats.lock().unwrap().pop_front();
            let stats = match stats {
                Some(stats) => stats,
                None => break,
            };
            if let Err(e) = self.post_json(remote_url, &stats).await {
                warn!(error = %e, "Failed to ship performance report, requeuing");
                self.pending_stats.lock().unwrap().push_front(stats);
                return;
            }
        }

        loop {
            let batch = self.next_log_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            let payload = json!({ "logs": batch });
            if let Err(e) = self.post_json(remote_url, &payload).await {
                warn!(error = %e, count = batch.len(), "Failed to ship log batch, requeuing");
                self.requeue_logs_front(batch);
                return;
            }
            debug!(count = batch.len(), "Shipped log batch");
        }
    }

    fn next_log_batch(&self, batch_size: usize) -> Vec<String> {
        let mut pending = self.pending_logs.lock().unwrap();
        let n = batch_size.max(1).min(pending.len());
        pending.drain(..n).collect()
    }

    fn requeue_logs_front(&self, batch: Vec<String>) {
        let mut pending = self.pending_logs.lock().unwrap();
        for line in batch.into_iter().rev() {
            pending.push_front(line);
        }
    }

    async fn post_json<B: Serialize>(&self, url: &str, body: &B) -> Result<(), DataError> {
        let response = self.http.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(DataError::Transport(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

impl PerformanceMonitor {
    /// Start the periodic reporting task.
    ///
    /// Any previously running reporter is stopped first, so
    /// reconfiguration never leaves two timers running.
    pub fn start_reporting(&self) {
        self.stop_reporting();

        let config = self.config();
        if !config.enabled {
            return;
        }

        let monitor = self.clone();
        let period = config.reporting_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so the
            // first report fires one full period after start
            interval.tick().await;
            loop {
                interval.tick().await;
                monitor.flush_report().await;
            }
        });

        *self.inner.reporter.lock().unwrap() = Some(handle);
        debug!(interval_ms = period.as_millis() as u64, "Performance reporter started");
    }

    /// Stop the periodic reporting task. Idempotent.
    pub fn stop_reporting(&self) {
        if let Some(handle) = self.inner.reporter.lock().unwrap().take() {
            handle.abort();
            debug!("Performance reporter stopped");
        }
    }

    /// Whether the reporting task is currently running
    pub fn is_reporting(&self) -> bool {
        self.inner
            .reporter
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Replace the configuration, restarting a running reporter so the
    /// new interval takes effect without a window of two timers.
    pub fn update_config(&self, config: MonitorConfig) {
        let was_running = self.is_reporting();
        self.stop_reporting();
        *self.inner.config.write().unwrap() = config;
        if was_running {
            self.start_reporting();
        }
    }

    /// Flush one report now: aggregate the completed buffer, log it,
    /// queue it for remote delivery, and clear the buffer.
    pub async fn flush_report(&self) {
        let config = self.config();
        let records = self.take_completed();

        if !records.is_empty() {
            let stats = aggregate_records(&records, config.slow_threshold);
            info!(
                total_ops = stats.total_ops,
                success_rate = stats.success_rate,
                avg_duration_ms = stats.avg_duration_ms,
                slow_ops = stats.slow_op_count,
                "Performance report"
            );
            if config.remote_reporting {
                self.inner.sink.enqueue_stats(stats);
            }
        }

        if config.remote_reporting {
            if let Some(url) = config.remote_url.as_deref() {
                self.inner.sink.flush(url, config.batch_size).await;
            }
        }
    }

    /// Emit a log line locally and, when remote reporting is on, queue
    /// its formatted form for shipping.
    pub fn ship_log(&self, level: Level, message: &str, context: HashMap<String, String>) {
        if level == Level::ERROR {
            error!(context = ?context, "{}", message);
        } else if level == Level::WARN {
            warn!(context = ?context, "{}", message);
        } else if level == Level::INFO {
            info!(context = ?context, "{}", message);
        } else {
            debug!(context = ?context, "{}", message);
        }

        if self.config().remote_reporting {
            self.inner
                .sink
                .enqueue_log(format_log_line(&level.to_string(), message, &context));
        }
    }
}
