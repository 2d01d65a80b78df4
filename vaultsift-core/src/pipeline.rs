//! Bounded-concurrency decryption and order-preserving reassembly.
//!
//! This module turns a batch of fetched records into an ordered list of
//! decrypted items:
//! 1. Pre-filters records (secret-less records are dropped when secrets are
//!    wanted)
//! 2. Decrypts them on a pool of `min(workers, eligible)` spawned tasks that
//!    share one pre-loaded job queue and one result channel
//! 3. Writes results into a slot array indexed by submission order
//! 4. Tallies unsupported-type skips and fails the run on any other error
//!
//! # Security
//! - Decrypted secrets exist only inside the returned items and are zeroed
//!   when those items are dropped
//! - Secret values are never logged

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::capability::DecryptionCapability;
use crate::classifier::{TypeClassifier, TypeResolver};
use crate::config::{PipelineConfig, UnsupportedTypePolicy};
use crate::error::SiftError;
use crate::models::{DecryptedFields, DecryptedItem, FailureTally, Record, Secret};

/// Result of a successful pipeline run.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Decrypted items in submission order
    pub items: Vec<DecryptedItem>,
    /// Records skipped because their type is unsupported
    pub skipped: FailureTally,
}

/// Explicit session state shared by every run in one process execution.
///
/// Owns the type cache (which outlives individual runs) together with the
/// decryption capability and configuration, so the pipeline can be driven
/// with fake collaborators in tests.
pub struct Session {
    classifier: Arc<TypeClassifier>,
    capability: Arc<dyn DecryptionCapability>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("classifier", &self.classifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with an empty type cache.
    pub fn new(
        resolver: Arc<dyn TypeResolver>,
        capability: Arc<dyn DecryptionCapability>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            classifier: Arc::new(TypeClassifier::new(resolver)),
            capability,
            config,
        }
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the session's type classifier.
    pub fn classifier(&self) -> &TypeClassifier {
        &self.classifier
    }

    /// Decrypts `records` and returns them in submission order.
    ///
    /// # Arguments
    ///
    /// * `records` - Records fetched from the server
    /// * `want_secret` - Decrypt secrets (password, description) too
    /// * `cancel` - Cancels in-flight decryption; a cancelled run fails
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any record fails with anything other than an unsupported type
    ///   (or with an unsupported type under `UnsupportedTypePolicy::Fail`)
    /// - The run is cancelled
    ///
    /// No partial output is returned on error.
    pub async fn run_pipeline(
        &self,
        records: &[Record],
        want_secret: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let start_time = Instant::now();
        let eligible = select_eligible(records, want_secret);

        if eligible.is_empty() {
            tracing::info!(
                "No eligible records among {} fetched; nothing to decrypt",
                records.len()
            );
            return Ok(PipelineOutput::default());
        }

        let expected = eligible.len();
        let workers = self.config.effective_workers(expected);

        tracing::info!(
            "Decrypting {} of {} records (workers: {}, secrets: {})",
            expected,
            records.len(),
            workers,
            want_secret
        );

        let pool = WorkerPool {
            records: eligible,
            want_secret,
            classifier: Arc::clone(&self.classifier),
            capability: Arc::clone(&self.capability),
            cancel: cancel.clone(),
        };
        let results = pool.run(workers).await;

        let reassembled = reassemble(
            results,
            expected,
            &self.classifier,
            self.config.unsupported_policy,
        );

        if cancel.is_cancelled() {
            tracing::warn!("Pipeline run cancelled; discarding partial results");
            return Err(SiftError::Cancelled);
        }

        let (items, skipped) = reassembled?;

        tracing::info!(
            "Decrypted {} records in {:.2}s ({} skipped)",
            items.len(),
            start_time.elapsed().as_secs_f64(),
            skipped.total()
        );

        Ok(PipelineOutput { items, skipped })
    }

    /// Tears the session down, dropping every cached type resolution.
    pub fn close(self) {
        tracing::debug!("Closing session ({} cached types)", self.classifier.len());
        self.classifier.clear();
    }
}

/// Selects the records that will be dispatched.
///
/// When secrets are wanted, records without any secret payload are excluded
/// outright rather than reported as failures.
pub fn select_eligible(records: &[Record], want_secret: bool) -> Vec<Arc<Record>> {
    records
        .iter()
        .filter(|record| {
            let keep = !want_secret || record.has_secret();
            if !keep {
                tracing::debug!("Skipping record {} without secret", record.id);
            }
            keep
        })
        .map(|record| Arc::new(record.clone()))
        .collect()
}

/// One run's worth of decrypt workers.
struct WorkerPool {
    records: Vec<Arc<Record>>,
    want_secret: bool,
    classifier: Arc<TypeClassifier>,
    capability: Arc<dyn DecryptionCapability>,
    cancel: CancellationToken,
}

/// State shared read-only by all workers of a pool.
struct WorkerShared {
    pool: WorkerPool,
    jobs: Mutex<mpsc::Receiver<usize>>,
}

impl WorkerPool {
    /// Runs `workers` tasks until the job queue is drained.
    ///
    /// Returns one item per dispatched job, in completion order.
    async fn run(self, workers: usize) -> Vec<DecryptedItem> {
        let job_count = self.records.len();

        // The queue is fully loaded and closed before any worker starts, so
        // an empty queue always means "drained".
        let (job_tx, job_rx) = mpsc::channel(job_count.max(1));
        for index in 0..job_count {
            if job_tx.try_send(index).is_err() {
                tracing::error!("Job queue rejected index {}", index);
            }
        }
        drop(job_tx);

        let shared = Arc::new(WorkerShared {
            pool: self,
            jobs: Mutex::new(job_rx),
        });

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let shared = Arc::clone(&shared);
            let result_tx = result_tx.clone();
            tasks.spawn(async move { shared.work(worker_id, result_tx).await });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(job_count);
        while let Some(item) = result_rx.recv().await {
            results.push(item);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Decrypt worker terminated abnormally: {}", e);
            }
        }

        results
    }
}

impl WorkerShared {
    fn next_job(&self) -> Option<usize> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    async fn work(&self, worker_id: usize, results: mpsc::UnboundedSender<DecryptedItem>) {
        let mut processed = 0usize;

        while let Some(index) = self.next_job() {
            let Some(record) = self.pool.records.get(index).map(Arc::clone) else {
                continue;
            };

            let item = match self.decrypt_record(&record).await {
                Ok(fields) => DecryptedItem::decrypted(index, record, fields),
                Err(e) => {
                    tracing::debug!("Record {} failed: {}", record.id, e);
                    DecryptedItem::failed(index, record, e)
                }
            };
            processed = processed.saturating_add(1);

            if results.send(item).is_err() {
                break;
            }
        }

        tracing::trace!("Worker {} finished after {} records", worker_id, processed);
    }

    async fn decrypt_record(&self, record: &Record) -> Result<DecryptedFields> {
        let pool = &self.pool;

        let resolved = tokio::select! {
            biased;
            () = pool.cancel.cancelled() => return Err(SiftError::Cancelled),
            resolved = pool.classifier.resolve(&record.resource_type_id) => resolved?,
        };

        // Legacy metadata is plaintext; without secrets there is nothing to
        // decrypt.
        if !pool.want_secret && resolved.is_legacy() {
            return Ok(DecryptedFields::from_plaintext(record));
        }

        let empty = Secret::default();
        let secret = record.first_secret().unwrap_or(&empty);

        tokio::select! {
            biased;
            () = pool.cancel.cancelled() => Err(SiftError::Cancelled),
            fields = pool.capability.decrypt(record, secret, &resolved, pool.want_secret) => fields,
        }
    }
}

/// Restores submission order and applies the failure policy.
///
/// # Arguments
///
/// * `results` - One item per dispatched job, in any order
/// * `expected` - Number of dispatched jobs
/// * `classifier` - Used to label unsupported types (cache lookup only)
/// * `policy` - Whether unsupported types are skipped or fatal
///
/// # Returns
///
/// The ordered successful items and the skip tally. When the tally is not
/// empty a warning summary is logged once.
///
/// # Errors
///
/// Returns the first fatal per-item error in submission order, wrapped with
/// the record id, or a reassembly error if a slot is missing or duplicated.
pub fn reassemble(
    results: Vec<DecryptedItem>,
    expected: usize,
    classifier: &TypeClassifier,
    policy: UnsupportedTypePolicy,
) -> Result<(Vec<DecryptedItem>, FailureTally)> {
    let mut slots: Vec<Option<DecryptedItem>> = (0..expected).map(|_| None).collect();

    for item in results {
        let index = item.index;
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(item),
            Some(_) => {
                return Err(SiftError::reassembly(format!(
                    "duplicate result for job {}",
                    index
                )));
            }
            None => {
                return Err(SiftError::reassembly(format!(
                    "result index {} out of range for {} jobs",
                    index, expected
                )));
            }
        }
    }

    let mut ordered = Vec::with_capacity(expected);
    let mut tally = FailureTally::new();

    for (index, slot) in slots.into_iter().enumerate() {
        let Some(mut item) = slot else {
            return Err(SiftError::reassembly(format!(
                "missing result for job {}",
                index
            )));
        };

        match item.failure.take() {
            None => ordered.push(item),
            Some(e) if e.is_unsupported_type() && policy == UnsupportedTypePolicy::Skip => {
                tally.record(classifier.label_for(&item.record.resource_type_id));
            }
            Some(e) => return Err(SiftError::item(item.record.id.clone(), e)),
        }
    }

    tally.log_summary();

    Ok((ordered, tally))
}
