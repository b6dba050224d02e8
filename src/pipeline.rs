//! Ingestion pipeline wiring: listener, dispatch queue, worker pool, writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::errors::IngestError;
use crate::listener::UdpListener;
use crate::queue::dispatch_queue;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::store::EventStore;
use crate::worker::WorkerPool;
use crate::writer::EventWriter;

/// A started pipeline.
pub struct Pipeline {
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
    workers: WorkerPool,
    stats: Arc<PipelineStats>,
    drain_timeout: Duration,
}

impl Pipeline {
    /// Validate the config, bind the socket and start listener and workers.
    ///
    /// The pipeline runs until `cancel_token` fires.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or if the socket cannot be bound.
    pub async fn start<S: EventStore>(
        config: &PipelineConfig,
        store: Arc<S>,
        cancel_token: CancellationToken,
    ) -> Result<Self, IngestError> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::new());
        let (sender, receiver) = dispatch_queue(config.queue_capacity);

        let listener = UdpListener::bind(
            &config.bind_addr(),
            config.max_datagram_size,
            sender,
            cancel_token,
            Arc::clone(&stats),
        )
        .await?;
        let local_addr = listener.local_addr()?;

        let writer = EventWriter::new(store, config.writer);
        let workers = WorkerPool::spawn(
            config.workers,
            &receiver,
            &writer,
            config.delimiter,
            &stats,
        );
        // Workers hold their own receiver clones
        drop(receiver);

        let listener = tokio::spawn(listener.spin());

        Ok(Self {
            local_addr,
            listener,
            workers,
            stats,
            drain_timeout: config.drain_timeout,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait for the listener to stop, then drain the queue.
    pub async fn wait(self) -> StatsSnapshot {
        if let Err(e) = self.listener.await {
            error!("listener task failed: {}", e);
        }

        info!(
            "draining dispatch queue across {} workers (up to {:?})",
            self.workers.running(),
            self.drain_timeout
        );
        if self.workers.drain(self.drain_timeout).await {
            info!("all workers finished");
        }

        let summary = self.stats.snapshot();
        info!(
            "pipeline stopped: {} (dedup rate: {:.1}%)",
            summary,
            summary.dupe_rate() * 100.0
        );
        summary
    }
}
