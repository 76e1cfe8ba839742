//! Data-layer error types
//!
//! Structured error handling for storage, caching, fetching, and report
//! transport. Variants carry string payloads so the whole enum is `Clone`,
//! which lets a single loader failure fan out to every caller waiting on
//! the same in-flight cache load.

use std::fmt;

/// One failed attempt in an ordered fetch-strategy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Name of the strategy that was attempted
    pub strategy: String,
    /// Why it failed
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Data-layer error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataError {
    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("all fetch strategies failed [{}]", join_attempts(.attempts))]
    FetchExhausted { attempts: Vec<StrategyFailure> },

    #[error("transport error: {0}")]
    Transport(String),
}

impl DataError {
    /// Whether this error must stay inside the caching/transport layers.
    ///
    /// Storage and transport failures are recovered locally (cache miss,
    /// requeued batch); only fetch-side failures may reach a caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, DataError::Storage(_) | DataError::Transport(_))
    }

    /// Collapse a strategy-chain failure list into one typed error.
    pub fn exhausted(attempts: Vec<StrategyFailure>) -> Self {
        DataError::FetchExhausted { attempts }
    }
}

fn join_attempts(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self {
        DataError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(e: reqwest::Error) -> Self {
        DataError::Transport(e.to_string())
    }
}
