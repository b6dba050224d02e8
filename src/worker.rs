//! Fixed worker pool draining the dispatch queue.
//!
//! Each worker takes one datagram at a time and runs it through the parser,
//! the fingerprint builder and the writer before pulling the next. Failures
//! are per-datagram: they are logged and counted, and the worker moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::dedup::build_fingerprint;
use crate::errors::IngestError;
use crate::models::RawDatagram;
use crate::parser::{decode_payload, parse_event};
use crate::queue::QueueReceiver;
use crate::stats::PipelineStats;
use crate::store::{EventStore, InsertOutcome};
use crate::writer::EventWriter;

/// Parse, fingerprint and persist one datagram.
///
/// The capture timestamp is taken here, at processing time.
///
/// # Errors
///
/// Returns `IngestError::Format` for malformed datagrams (the writer is not
/// called) and `IngestError::Store` when the insert fails for good.
pub async fn process_datagram<S: EventStore>(
    datagram: &RawDatagram,
    writer: &EventWriter<S>,
    delimiter: char,
) -> Result<InsertOutcome, IngestError> {
    let text = decode_payload(&datagram.payload);
    let event = parse_event(&text, &datagram.source_ip(), Local::now(), delimiter)?;
    let fingerprint = build_fingerprint(
        &event.body,
        &event.source_ip,
        &event.capture_stamp(),
        delimiter,
    );

    Ok(writer.write(&event, fingerprint).await?)
}

/// A single pull loop over the shared queue.
struct Worker<S> {
    id: usize,
    queue: QueueReceiver,
    writer: EventWriter<S>,
    delimiter: char,
    stats: Arc<PipelineStats>,
}

impl<S: EventStore> Worker<S> {
    /// Runs until the queue is closed and empty.
    async fn run(self) {
        debug!(worker = self.id, "worker started");
        while let Some(datagram) = self.queue.pull().await {
            self.handle(&datagram).await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn handle(&self, datagram: &RawDatagram) {
        match process_datagram(datagram, &self.writer, self.delimiter).await {
            Ok(InsertOutcome::Inserted) => {
                self.stats.record_inserted();
                debug!(worker = self.id, source = %datagram.source, "event stored");
            }
            Ok(InsertOutcome::DuplicateFingerprint) => {
                self.stats.record_duplicate();
                info!(
                    worker = self.id,
                    source = %datagram.source,
                    "duplicate event fingerprint, nothing written"
                );
            }
            Err(IngestError::Format(e)) => {
                self.stats.record_format_error();
                warn!(
                    worker = self.id,
                    source = %datagram.source,
                    len = datagram.payload.len(),
                    "dropping malformed datagram: {}",
                    e
                );
                trace!(payload = %decode_payload(&datagram.payload), "malformed payload");
            }
            Err(e) => {
                self.stats.record_store_failure();
                error!(
                    worker = self.id,
                    source = %datagram.source,
                    "dropping datagram: {}",
                    e
                );
            }
        }
    }
}

/// Handle on the running workers.
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    #[must_use]
    pub fn spawn<S: EventStore>(
        size: usize,
        queue: &QueueReceiver,
        writer: &EventWriter<S>,
        delimiter: char,
        stats: &Arc<PipelineStats>,
    ) -> Self {
        let mut tasks = JoinSet::new();
        for id in 0..size {
            let worker = Worker {
                id,
                queue: queue.clone(),
                writer: writer.clone(),
                delimiter,
                stats: Arc::clone(stats),
            };
            tasks.spawn(worker.run());
        }
        info!("started {} workers", size);
        Self { tasks }
    }

    /// Number of workers still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for workers to drain the queue once it is closed.
    ///
    /// Workers still running after `timeout` are aborted. Returns `true` if
    /// every worker finished on its own.
    pub async fn drain(mut self, timeout: Duration) -> bool {
        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    error!("worker task failed: {}", e);
                }
            }
        })
        .await;

        if joined.is_ok() {
            return true;
        }

        warn!(
            "{} workers still busy after {:?}, aborting",
            self.tasks.len(),
            timeout
        );
        self.tasks.shutdown().await;
        false
    }
}
