//! End-to-end pipeline tests with fake collaborators.
//!
//! The fakes sleep for random short intervals so that completion order is
//! shuffled relative to submission order on every run.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use async_trait::async_trait;
use proptest::prelude::*;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vaultsift_core::pipeline::reassemble;
use vaultsift_core::{
    DecryptedFields, DecryptedItem, DecryptionCapability, PipelineConfig, Record, ResolvedType,
    Result, Secret, Session, SiftError, TypeClassifier, TypeResolver, UnsupportedTypePolicy,
};

const DEFAULT_TYPE: &str = "type-default";
const LEGACY_TYPE: &str = "type-legacy";
const CUSTOM_FIELDS_TYPE: &str = "type-custom-fields";

async fn jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let delay = rand::rng().random_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

struct MapResolver {
    slugs: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MapResolver {
    fn new() -> Self {
        let slugs = [
            (DEFAULT_TYPE, "v5-default"),
            (LEGACY_TYPE, "password-and-description"),
            (CUSTOM_FIELDS_TYPE, "v5-custom-fields"),
        ]
        .into_iter()
        .map(|(id, slug)| (id.to_string(), slug.to_string()))
        .collect();

        Self {
            slugs,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TypeResolver for MapResolver {
    async fn lookup(&self, type_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        jitter(3).await;
        self.slugs
            .get(type_id)
            .cloned()
            .ok_or_else(|| SiftError::configuration(format!("no resource type {}", type_id)))
    }
}

#[derive(Default)]
struct FakeCapability {
    calls: AtomicUsize,
    fail_ids: HashSet<String>,
    max_delay_ms: u64,
    hang: bool,
}

impl FakeCapability {
    fn with_delay(max_delay_ms: u64) -> Self {
        Self {
            max_delay_ms,
            ..Self::default()
        }
    }

    fn failing_on(id: &str) -> Self {
        Self {
            fail_ids: HashSet::from([id.to_string()]),
            max_delay_ms: 2,
            ..Self::default()
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecryptionCapability for FakeCapability {
    async fn decrypt(
        &self,
        record: &Record,
        secret: &Secret,
        resolved: &ResolvedType,
        want_secret: bool,
    ) -> Result<DecryptedFields> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        jitter(self.max_delay_ms).await;

        if self.fail_ids.contains(&record.id) {
            return Err(SiftError::decryption_failed(
                "secret",
                std::io::Error::other("bad armor"),
            ));
        }
        if !resolved.secret_supported {
            return Err(SiftError::unsupported_type(&resolved.slug));
        }
        if want_secret && secret.is_empty() {
            return Err(SiftError::missing_secret(&record.id));
        }

        let password = if want_secret { secret.data.as_str() } else { "" };
        Ok(DecryptedFields::new(
            format!("decrypted-{}", record.id),
            "user",
            "https://vault.example",
            password,
            "",
        ))
    }
}

fn record(index: usize, type_id: &str) -> Record {
    let mut record = Record::new(format!("res-{:03}", index), type_id);
    record.name = format!("plain-{}", index);
    record.secrets = vec![Secret::new(format!("pw-{}", index))];
    record
}

fn records(count: usize, type_id: &str) -> Vec<Record> {
    (0..count).map(|i| record(i, type_id)).collect()
}

fn session(capability: Arc<FakeCapability>, workers: usize) -> (Session, Arc<MapResolver>) {
    let resolver = Arc::new(MapResolver::new());
    let session = Session::new(
        resolver.clone(),
        capability,
        PipelineConfig::new().with_workers(workers),
    );
    (session, resolver)
}

fn ids(items: &[DecryptedItem]) -> Vec<String> {
    items.iter().map(|item| item.id().to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_output_order_matches_submission_order() {
    let capability = Arc::new(FakeCapability::with_delay(10));
    let (session, _) = session(capability.clone(), 8);
    let input = records(64, DEFAULT_TYPE);

    let output = session
        .run_pipeline(&input, true, &CancellationToken::new())
        .await
        .unwrap();

    let expected: Vec<String> = input.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids(&output.items), expected);
    assert!(output.skipped.is_empty());
    assert_eq!(capability.calls(), 64);

    for (index, item) in output.items.iter().enumerate() {
        assert_eq!(item.index, index);
        assert_eq!(item.password(), format!("pw-{}", index));
        assert!(item.failure.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsupported_types_are_skipped_and_tallied() {
    let capability = Arc::new(FakeCapability::with_delay(5));
    let (session, _) = session(capability, 3);

    let input: Vec<Record> = (0..10)
        .map(|i| {
            let type_id = if i == 3 || i == 7 { CUSTOM_FIELDS_TYPE } else { DEFAULT_TYPE };
            record(i, type_id)
        })
        .collect();

    let output = session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.items.len(), 8);
    assert_eq!(
        ids(&output.items),
        ["res-000", "res-001", "res-002", "res-004", "res-005", "res-006", "res-008", "res-009"]
    );
    assert_eq!(output.skipped.total(), 2);
    assert_eq!(output.skipped.get("v5-custom-fields"), 2);
    assert_eq!(output.skipped.summary_lines().len(), 2);
}

#[tokio::test]
async fn test_reassembly_tallies_by_type_label() {
    struct Fixed;

    #[async_trait]
    impl TypeResolver for Fixed {
        async fn lookup(&self, _type_id: &str) -> Result<String> {
            Ok("unsupportedType".to_string())
        }
    }

    let classifier = TypeClassifier::new(Arc::new(Fixed));
    classifier.resolve("t-unsupported").await.unwrap();

    let results: Vec<DecryptedItem> = (0..10)
        .rev()
        .map(|i| {
            if i == 2 || i == 5 {
                let record = Arc::new(record(i, "t-unsupported"));
                DecryptedItem::failed(i, record, SiftError::unsupported_type("unsupportedType"))
            } else {
                let record = Arc::new(record(i, DEFAULT_TYPE));
                let fields = DecryptedFields::from_plaintext(&record);
                DecryptedItem::decrypted(i, record, fields)
            }
        })
        .collect();

    let (items, tally) =
        reassemble(results, 10, &classifier, UnsupportedTypePolicy::Skip).unwrap();

    assert_eq!(items.len(), 8);
    assert!(items.windows(2).all(|pair| pair[0].index < pair[1].index));
    assert_eq!(tally.iter().collect::<Vec<_>>(), vec![("unsupportedType", 2)]);
    assert_eq!(
        tally.summary_lines(),
        vec![
            "2 resource(s) skipped due to unsupported types:".to_string(),
            "  - unsupportedType: 2".to_string(),
        ]
    );
}

/// Log sink shared between the test and a scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}

/// Runs `f` with WARN-level events written to the returned log.
fn with_captured_warnings<R>(f: impl FnOnce() -> R) -> (R, CapturedLog) {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, log)
}

#[tokio::test]
async fn test_skip_summary_is_logged_once_per_run() {
    let classifier = TypeClassifier::new(Arc::new(MapResolver::new()));
    classifier.resolve(CUSTOM_FIELDS_TYPE).await.unwrap();

    let results: Vec<DecryptedItem> = (0..6)
        .map(|i| {
            if i % 2 == 0 {
                let record = Arc::new(record(i, CUSTOM_FIELDS_TYPE));
                DecryptedItem::failed(i, record, SiftError::unsupported_type("v5-custom-fields"))
            } else {
                let record = Arc::new(record(i, DEFAULT_TYPE));
                let fields = DecryptedFields::from_plaintext(&record);
                DecryptedItem::decrypted(i, record, fields)
            }
        })
        .collect();

    let (result, log) = with_captured_warnings(|| {
        reassemble(results, 6, &classifier, UnsupportedTypePolicy::Skip)
    });
    let (items, tally) = result.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(tally.total(), 3);

    let lines = log.lines();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines.iter().all(|line| line.contains("WARN")));
    assert!(lines[0].ends_with("3 resource(s) skipped due to unsupported types:"));
    assert!(lines[1].ends_with("  - v5-custom-fields: 3"));
}

#[tokio::test]
async fn test_clean_run_logs_no_skip_summary() {
    let classifier = TypeClassifier::new(Arc::new(MapResolver::new()));
    let results: Vec<DecryptedItem> = (0..4)
        .map(|i| {
            let record = Arc::new(record(i, DEFAULT_TYPE));
            let fields = DecryptedFields::from_plaintext(&record);
            DecryptedItem::decrypted(i, record, fields)
        })
        .collect();

    let (result, log) = with_captured_warnings(|| {
        reassemble(results, 4, &classifier, UnsupportedTypePolicy::Skip)
    });
    let (items, tally) = result.unwrap();
    assert_eq!(items.len(), 4);
    assert!(tally.is_empty());
    assert!(log.lines().is_empty());
}

#[tokio::test]
async fn test_legacy_types_take_plaintext_fast_path() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability.clone(), 4);
    let input = records(12, LEGACY_TYPE);

    let output = session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(capability.calls(), 0);
    assert_eq!(output.items.len(), 12);
    assert_eq!(output.items[5].name(), "plain-5");
    assert_eq!(output.items[5].password(), "");
}

#[tokio::test]
async fn test_legacy_types_decrypt_when_secrets_wanted() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability.clone(), 4);
    let input = records(5, LEGACY_TYPE);

    let output = session
        .run_pipeline(&input, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(capability.calls(), 5);
    assert_eq!(output.items[0].name(), "decrypted-res-000");
    assert_eq!(output.items[0].password(), "pw-0");
}

#[tokio::test]
async fn test_zero_records_is_empty_success() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, resolver) = session(capability.clone(), 4);

    let output = session
        .run_pipeline(&[], false, &CancellationToken::new())
        .await
        .unwrap();

    assert!(output.items.is_empty());
    assert!(output.skipped.is_empty());
    assert_eq!(capability.calls(), 0);
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_records_without_secret_are_not_dispatched_when_secrets_wanted() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability.clone(), 4);

    let mut input = records(6, DEFAULT_TYPE);
    input[1].secrets.clear();
    input[4].secrets.clear();

    let output = session
        .run_pipeline(&input, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(capability.calls(), 4);
    assert_eq!(ids(&output.items), ["res-000", "res-002", "res-003", "res-005"]);

    // without secrets wanted every record is dispatched
    let output = session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(output.items.len(), 6);
}

#[tokio::test]
async fn test_only_secretless_records_yield_empty_output() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability.clone(), 4);

    let mut input = records(3, DEFAULT_TYPE);
    for record in &mut input {
        record.secrets.clear();
    }

    let output = session
        .run_pipeline(&input, true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(output.items.is_empty());
    assert_eq!(capability.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fatal_item_error_fails_whole_run() {
    let capability = Arc::new(FakeCapability::failing_on("res-017"));
    let (session, _) = session(capability, 4);
    let input = records(30, DEFAULT_TYPE);

    let err = session
        .run_pipeline(&input, true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SiftError::Item { ref record_id, .. } if record_id == "res-017"));
    assert!(err.to_string().starts_with("Get Resource res-017"));
    assert!(!err.is_unsupported_type());
}

#[tokio::test]
async fn test_type_resolution_failure_is_fatal() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability, 2);
    let mut input = records(4, DEFAULT_TYPE);
    input[2].resource_type_id = "type-missing".to_string();

    let err = session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap_err();

    let SiftError::Item { record_id, source } = err else {
        panic!("expected an item error");
    };
    assert_eq!(record_id, "res-002");
    assert!(matches!(*source, SiftError::TypeResolution { ref type_id, .. } if type_id == "type-missing"));
}

#[tokio::test]
async fn test_fail_policy_makes_unsupported_types_fatal() {
    let resolver = Arc::new(MapResolver::new());
    let config = PipelineConfig::new()
        .with_workers(2)
        .with_unsupported_policy(UnsupportedTypePolicy::Fail);
    let session = Session::new(resolver, Arc::new(FakeCapability::with_delay(0)), config);

    let mut input = records(4, DEFAULT_TYPE);
    input[1].resource_type_id = CUSTOM_FIELDS_TYPE.to_string();

    let err = session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_unsupported_type());
    assert!(matches!(err, SiftError::Item { ref record_id, .. } if record_id == "res-001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_type_lookups_are_cached_across_runs() {
    let capability = Arc::new(FakeCapability::with_delay(2));
    let (session, resolver) = session(capability, 6);

    let input: Vec<Record> = (0..40)
        .map(|i| {
            let type_id = match i % 3 {
                0 => DEFAULT_TYPE,
                1 => LEGACY_TYPE,
                _ => CUSTOM_FIELDS_TYPE,
            };
            record(i, type_id)
        })
        .collect();

    session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resolver.calls(), 3);

    session
        .run_pipeline(&input, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resolver.calls(), 3);
    assert_eq!(session.classifier().len(), 3);

    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_unblocks_hanging_workers() {
    let capability = Arc::new(FakeCapability::hanging());
    let (session, _) = session(capability, 4);
    let input = records(16, DEFAULT_TYPE);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.run_pipeline(&input, true, &cancel),
    )
    .await
    .expect("cancelled run must finish promptly");

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_cancelled_before_start_reports_cancelled() {
    let capability = Arc::new(FakeCapability::with_delay(0));
    let (session, _) = session(capability.clone(), 2);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session
        .run_pipeline(&records(5, DEFAULT_TYPE), true, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SiftError::Cancelled));
    assert_eq!(capability.calls(), 0);
}

fn run_blocking(input: &[Record], workers: usize, want_secret: bool) -> Vec<(usize, String, String)> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async {
        let (session, _) = session(Arc::new(FakeCapability::with_delay(3)), workers);
        let output = session
            .run_pipeline(input, want_secret, &CancellationToken::new())
            .await
            .unwrap();
        output
            .items
            .iter()
            .map(|item| (item.index, item.id().to_string(), item.name().to_string()))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_worker_count_does_not_change_output(
        type_picks in prop::collection::vec(0usize..3, 0..40),
        workers in 2usize..12,
        want_secret in any::<bool>(),
    ) {
        let types = [DEFAULT_TYPE, LEGACY_TYPE, CUSTOM_FIELDS_TYPE];
        let input: Vec<Record> = type_picks
            .iter()
            .enumerate()
            .map(|(i, pick)| record(i, types[*pick]))
            .collect();

        let sequential = run_blocking(&input, 1, want_secret);
        let parallel = run_blocking(&input, workers, want_secret);
        prop_assert_eq!(&sequential, &parallel);

        let unsupported = type_picks.iter().filter(|pick| **pick == 2).count();
        prop_assert_eq!(sequential.len(), input.len() - unsupported);
        prop_assert!(sequential.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }
}
