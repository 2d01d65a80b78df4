//! Pipeline configuration.
//!
//! Controls worker concurrency and how unsupported resource types are
//! treated during reassembly.

use serde::{Deserialize, Serialize};

/// Worker count used when available parallelism cannot be determined.
pub const DEFAULT_WORKERS: usize = 4;

/// What to do with records whose type has no decryption strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedTypePolicy {
    /// Drop the record from output and count it in the skip tally
    #[default]
    Skip,
    /// Treat the record like any other decryption failure and fail the run
    Fail,
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Desired number of concurrent decrypt workers (always >= 1).
    ///
    /// The effective pool size is further capped by the number of eligible
    /// records.
    pub workers: usize,

    /// Handling of unsupported-type failures
    pub unsupported_policy: UnsupportedTypePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(DEFAULT_WORKERS);
        Self {
            workers,
            unsupported_policy: UnsupportedTypePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the desired worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        if workers == 0 {
            tracing::warn!("worker count 0 clamped to 1");
        }
        self.workers = workers.max(1);
        self
    }

    /// Sets the unsupported-type policy.
    pub fn with_unsupported_policy(mut self, policy: UnsupportedTypePolicy) -> Self {
        self.unsupported_policy = policy;
        self
    }

    /// Effective pool size for `eligible` records.
    ///
    /// Zero only when there is no work at all.
    pub fn effective_workers(&self, eligible: usize) -> usize {
        self.workers.max(1).min(eligible)
    }
}
