//! Publishing records to a remote search index.
//!
//! [`SearchIndex`] is the transport seam: one attempt per call, errors
//! classified into [`PublishError`] kinds. [`IndexPublisher`] wraps any
//! index with the retry policy:
//!
//! - `Transient` (network error, HTTP 429, 5xx) → retry with exponential
//!   backoff until `max_attempts` attempts have been made
//! - `Rejected` (other 4xx) → fail immediately, no retry
//! - `AuthFailure` (401/403) → fail immediately; the crawler stops
//!   submitting further batches
//!
//! Implementations:
//!
//! - [`GlobusSearchIndex`]: Globus-Search-compatible HTTP API
//! - [`MemoryIndex`]: in-process map, for tests and dry runs

pub mod globus;
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PublishConfig;
use crate::error::PublishError;
use crate::models::{Batch, MetadataRecord};

pub use globus::{BearerToken, GlobusSearchIndex};
pub use memory::MemoryIndex;

/// What the index reported for an accepted submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    /// Asynchronous ingest task handle, when the index issues one.
    pub task_id: Option<String>,
    pub accepted: usize,
}

/// A remote search index, one attempt per call.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Submit `records` as one ingest document.
    async fn ingest(&self, records: &[MetadataRecord]) -> Result<IngestAck, PublishError>;

    /// Fetch the entry stored under `subject`; `NotFound` when absent.
    async fn get_entry(&self, subject: &str) -> Result<MetadataRecord, PublishError>;

    /// Remove the entry stored under `subject`; `NotFound` when absent.
    async fn delete_entry(&self, subject: &str) -> Result<(), PublishError>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    pub fn from_config(config: &PublishConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Retry immediately, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Sleep before attempt `attempt + 1`, given `attempt` has failed:
    /// base, 2×base, 4×base, ... capped at `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(5);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PublishConfig::default())
    }
}

/// Outcome of publishing one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub batch: usize,
    pub attempts: u32,
    /// Subjects the index accepted.
    pub accepted: Vec<String>,
    /// Subjects the index refused. A rejection that does not name
    /// records refuses the whole batch.
    pub rejected: Vec<String>,
    pub task_id: Option<String>,
    pub error: Option<PublishError>,
}

impl PublishResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn succeeded(batch: &Batch, attempts: u32, ack: IngestAck) -> Self {
        Self {
            batch: batch.index(),
            attempts,
            accepted: batch.subjects(),
            rejected: Vec::new(),
            task_id: ack.task_id,
            error: None,
        }
    }

    fn failed(batch: &Batch, attempts: u32, error: PublishError) -> Self {
        let rejected = match &error {
            PublishError::Rejected { subjects, .. } if !subjects.is_empty() => {
                let all = batch.subjects();
                subjects
                    .iter()
                    .filter(|s| all.contains(s))
                    .cloned()
                    .collect()
            }
            PublishError::Rejected { .. } => batch.subjects(),
            _ => Vec::new(),
        };
        Self {
            batch: batch.index(),
            attempts,
            accepted: Vec::new(),
            rejected,
            task_id: None,
            error: Some(error),
        }
    }
}

/// Layers [`RetryPolicy`] over a [`SearchIndex`]. Retry state lives on the
/// stack of each call, so one publisher can serve concurrent batches.
#[derive(Clone)]
pub struct IndexPublisher {
    index: Arc<dyn SearchIndex>,
    policy: RetryPolicy,
}

impl IndexPublisher {
    pub fn new(index: Arc<dyn SearchIndex>, policy: RetryPolicy) -> Self {
        Self { index, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Submit `batch`, retrying transient failures. Never panics or returns
    /// early: every failure ends up in the result.
    pub async fn publish(&self, batch: &Batch) -> PublishResult {
        let (attempts, outcome) = self
            .with_retry("ingest", || self.index.ingest(batch.records()))
            .await;
        match outcome {
            Ok(ack) => {
                debug!(batch = batch.index(), records = batch.len(), attempts, "batch published");
                PublishResult::succeeded(batch, attempts, ack)
            }
            Err(error) => {
                warn!(batch = batch.index(), records = batch.len(), attempts, error = %error, "batch not published");
                PublishResult::failed(batch, attempts, error)
            }
        }
    }

    pub async fn get_entry(&self, subject: &str) -> Result<MetadataRecord, PublishError> {
        self.with_retry("get_entry", || self.index.get_entry(subject))
            .await
            .1
    }

    pub async fn delete_entry(&self, subject: &str) -> Result<(), PublishError> {
        self.with_retry("delete_entry", || self.index.delete_entry(subject))
            .await
            .1
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Returns the number of attempts made.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> (u32, Result<T, PublishError>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PublishError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return (attempt, Ok(value)),
                Err(PublishError::Transient { message, .. }) => {
                    if attempt >= self.policy.max_attempts {
                        return (
                            attempt,
                            Err(PublishError::Transient {
                                attempts: attempt,
                                message,
                            }),
                        );
                    }
                    let delay = self.policy.delay(attempt);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %message, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return (attempt, Err(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fields;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn record(subject: &str) -> MetadataRecord {
        MetadataRecord {
            subject: subject.into(),
            visible_to: vec!["public".into()],
            content: Fields::new(),
        }
    }

    /// Fails the first `failures` calls with `error`, then delegates.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: PublishError,
        inner: MemoryIndex,
    }

    impl Flaky {
        fn new(failures: u32, error: PublishError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error,
                inner: MemoryIndex::new(),
            }
        }

        fn fail_now(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
        }
    }

    #[async_trait]
    impl SearchIndex for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn ingest(&self, records: &[MetadataRecord]) -> Result<IngestAck, PublishError> {
            if self.fail_now() {
                return Err(self.error.clone());
            }
            self.inner.ingest(records).await
        }
        async fn get_entry(&self, subject: &str) -> Result<MetadataRecord, PublishError> {
            if self.fail_now() {
                return Err(self.error.clone());
            }
            self.inner.get_entry(subject).await
        }
        async fn delete_entry(&self, subject: &str) -> Result<(), PublishError> {
            self.inner.delete_entry(subject).await
        }
    }

    fn transient() -> PublishError {
        PublishError::Transient {
            attempts: 1,
            message: "HTTP 503".into(),
        }
    }

    fn batch(subjects: &[&str]) -> Batch {
        Batch::seal(0, subjects.iter().map(|s| record(s)).collect())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        );
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay(30), Duration::from_millis(1_000));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn always_transient_uses_exactly_max_attempts() {
        let index = Arc::new(Flaky::new(u32::MAX, transient()));
        let publisher = IndexPublisher::new(index.clone(), RetryPolicy::immediate(4));
        let result = publisher.publish(&batch(&["a", "b"])).await;

        assert_eq!(index.calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.attempts, 4);
        assert!(matches!(
            result.error,
            Some(PublishError::Transient { attempts: 4, .. })
        ));
        assert!(result.accepted.is_empty());
        assert!(result.rejected.is_empty());
    }

    #[tokio::test]
    async fn transient_then_success() {
        let index = Arc::new(Flaky::new(2, transient()));
        let publisher = IndexPublisher::new(index.clone(), RetryPolicy::immediate(5));
        let result = publisher.publish(&batch(&["a"])).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.accepted, vec!["a".to_string()]);
        assert_eq!(publisher.get_entry("a").await.unwrap().subject, "a");
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let error = PublishError::Rejected {
            status: 400,
            message: "bad content".into(),
            subjects: vec!["b".into(), "not-in-batch".into()],
        };
        let index = Arc::new(Flaky::new(u32::MAX, error));
        let publisher = IndexPublisher::new(index.clone(), RetryPolicy::immediate(5));
        let result = publisher.publish(&batch(&["a", "b"])).await;
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.rejected, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn anonymous_rejection_covers_whole_batch() {
        let error = PublishError::Rejected {
            status: 422,
            message: "invalid".into(),
            subjects: Vec::new(),
        };
        let publisher = IndexPublisher::new(
            Arc::new(Flaky::new(u32::MAX, error)),
            RetryPolicy::immediate(3),
        );
        let result = publisher.publish(&batch(&["a", "b"])).await;
        assert_eq!(result.rejected, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let publisher = IndexPublisher::new(Arc::new(MemoryIndex::new()), RetryPolicy::immediate(3));
        let err = publisher.get_entry("file:///nope").await.unwrap_err();
        assert!(matches!(err, PublishError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_batches_share_a_publisher() {
        let index = Arc::new(MemoryIndex::new());
        let publisher = IndexPublisher::new(index.clone(), RetryPolicy::immediate(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for i in 0..4 {
            let publisher = publisher.clone();
            let seen = seen.clone();
            tasks.push(tokio::spawn(async move {
                let subject = format!("s{i}");
                let result = publisher.publish(&batch(&[subject.as_str()])).await;
                seen.lock().unwrap().push(result.is_success());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 4);
        assert_eq!(index.len(), 4);
    }
}
