//! Transactional, idempotent event writer.
//!
//! Wraps an `EventStore` with a per-attempt timeout and bounded retries for
//! transient failures. A timed-out attempt is abandoned through its
//! `WriteTicket`, so the blocking insert left behind rolls back instead of
//! committing after the writer has reported failure. If the store already
//! claimed the commit when the deadline passes, the writer waits for it.
//!
//! Blocking inserts in flight are capped, including abandoned ones that have
//! not returned yet, so a stalled store slows the workers down instead of
//! piling work onto the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DEFAULT_WORKERS;
use crate::errors::StoreError;
use crate::models::{EventIds, Fingerprint, ParsedEvent, StoredEvent};
use crate::store::{EventStore, InsertOutcome, WriteTicket};

/// Base delay for retry backoff; doubled per attempt.
const BACKOFF_BASE_MS: u64 = 10;

/// Cap on the backoff exponent so the delay cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Writer retry and timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterPolicy {
    /// Bound on a single insert attempt
    pub write_timeout: Duration,
    /// Extra attempts after the first for retryable failures
    pub max_retries: u32,
    /// Blocking inserts allowed to run at once, shared by all clones
    pub max_in_flight: usize,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            max_retries: 3,
            max_in_flight: DEFAULT_WORKERS,
        }
    }
}

/// Persists parsed events through a store handle supplied at construction.
pub struct EventWriter<S> {
    store: Arc<S>,
    policy: WriterPolicy,
    in_flight: Arc<Semaphore>,
}

impl<S> Clone for EventWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<S: EventStore> EventWriter<S> {
    #[must_use]
    pub fn new(store: Arc<S>, policy: WriterPolicy) -> Self {
        Self {
            store,
            in_flight: Arc::new(Semaphore::new(policy.max_in_flight)),
            policy,
        }
    }

    /// Build the stored row for `event` and insert it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Permanent` for terminal failures and when
    /// retryable failures outlast the retry budget.
    pub async fn write(
        &self,
        event: &ParsedEvent,
        fingerprint: Fingerprint,
    ) -> Result<InsertOutcome, StoreError> {
        let row = Arc::new(StoredEvent::new(event, fingerprint, EventIds::generate()));
        self.insert_with_retry(row).await
    }

    async fn insert_with_retry(&self, row: Arc<StoredEvent>) -> Result<InsertOutcome, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match self.insert_once(Arc::clone(&row)).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let backoff = backoff_delay(attempt);
                    warn!(
                        id = %row.id,
                        attempt,
                        "retrying event insert in {:?}: {}",
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(StoreError::Permanent(format!(
                        "gave up after {} attempts: {e}",
                        attempt + 1
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One bounded insert attempt on the blocking pool.
    ///
    /// The deadline covers waiting for an in-flight slot as well as the insert.
    async fn insert_once(&self, row: Arc<StoredEvent>) -> Result<InsertOutcome, StoreError> {
        let deadline = Instant::now() + self.policy.write_timeout;

        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.in_flight).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Permanent("event writer closed".to_string())),
            Err(_) => {
                debug!("no insert slot free within {:?}", self.policy.write_timeout);
                return Err(StoreError::Timeout(self.policy.write_timeout));
            }
        };

        let ticket = Arc::new(WriteTicket::new());
        let store = Arc::clone(&self.store);
        let claim = Arc::clone(&ticket);
        let mut task = tokio::task::spawn_blocking(move || {
            // Slot is held until the insert returns, abandoned or not
            let _permit = permit;
            store.insert_event(&row, &claim)
        });

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(_) if ticket.abandon() => {
                debug!("insert exceeded {:?}, abandoned", self.policy.write_timeout);
                Err(StoreError::Timeout(self.policy.write_timeout))
            }
            Err(_) => {
                debug!("insert past deadline but already committing, waiting");
                flatten(task.await)
            }
        }
    }
}

fn flatten(
    joined: Result<Result<InsertOutcome, StoreError>, JoinError>,
) -> Result<InsertOutcome, StoreError> {
    joined.unwrap_or_else(|e| Err(StoreError::Permanent(format!("insert task failed: {e}"))))
}

/// Exponential backoff: 20ms, 40ms, 80ms, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << attempt.min(MAX_BACKOFF_SHIFT))
}
