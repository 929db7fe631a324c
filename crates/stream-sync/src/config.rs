//! Synchronizer configuration.

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;

/// Settings shared by every stream synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backoff for both snapshot reads and feed reconnects.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SyncConfig {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}
