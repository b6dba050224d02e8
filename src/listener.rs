//! UDP listener feeding the dispatch queue.
//!
//! Reads datagrams in a tight loop, copies each one out of the socket buffer
//! and pushes it onto the queue. A full queue suspends the loop; a failed
//! read is logged and retried after a short backoff. The loop ends when the cancellation token
//! fires, and dropping the listener closes the queue for the workers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::IngestError;
use crate::models::RawDatagram;
use crate::queue::QueueSender;
use crate::stats::PipelineStats;

/// Base delay after a failed read; doubled per consecutive failure.
const READ_BACKOFF_BASE_MS: u64 = 10;

/// Cap on the read backoff exponent (10ms << 6 = 640ms).
const MAX_READ_BACKOFF_SHIFT: u32 = 6;

/// Where datagrams are read from.
enum DatagramSource {
    Udp(UdpSocket),

    /// Replays scripted reads, then waits forever
    #[cfg(test)]
    Scripted(std::sync::Mutex<std::collections::VecDeque<io::Result<(Vec<u8>, SocketAddr)>>>),
}

impl DatagramSource {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self {
            Self::Udp(socket) => socket.recv_from(buf).await,
            #[cfg(test)]
            Self::Scripted(reads) => {
                let next = reads.lock().ok().and_then(|mut r| r.pop_front());
                match next {
                    Some(Ok((data, source))) => {
                        let len = data.len().min(buf.len());
                        buf[..len].copy_from_slice(&data[..len]);
                        Ok((len, source))
                    }
                    Some(Err(e)) => Err(e),
                    None => std::future::pending().await,
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Udp(socket) => socket.local_addr(),
            #[cfg(test)]
            Self::Scripted(_) => Err(io::Error::other("scripted source has no address")),
        }
    }
}

/// Receives panel datagrams on one UDP socket.
pub struct UdpListener {
    socket: DatagramSource,
    queue: QueueSender,
    cancel_token: CancellationToken,
    stats: Arc<PipelineStats>,
    max_datagram_size: usize,
}

impl UdpListener {
    /// Bind the listener socket.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Transport` if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        max_datagram_size: usize,
        queue: QueueSender,
        cancel_token: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, IngestError> {
        let socket = UdpSocket::bind(addr).await?;
        info!("listening for panel datagrams on {}", socket.local_addr()?);

        Ok(Self {
            socket: DatagramSource::Udp(socket),
            queue,
            cancel_token,
            stats,
            max_datagram_size,
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot report the address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Returns once cancelled.
    pub async fn spin(self) {
        // Reused read buffer; each payload is copied out before enqueueing
        let mut buf = vec![0u8; self.max_datagram_size];
        let mut consecutive_errors: u32 = 0;

        loop {
            let received = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            let (len, source) = match received {
                Ok(read) => read,
                Err(e) => {
                    self.stats.record_read_error();
                    consecutive_errors += 1;
                    let backoff = read_backoff(consecutive_errors);
                    warn!("error reading UDP datagram, retrying in {:?}: {}", backoff, e);

                    tokio::select! {
                        () = tokio::time::sleep(backoff) => continue,
                        () = self.cancel_token.cancelled() => break,
                    }
                }
            };
            consecutive_errors = 0;

            self.stats.record_received();
            debug!(%source, len, queue_free = self.queue.available(), "datagram received");
            let datagram = RawDatagram::new(buf[..len].to_vec(), source);

            let pushed = tokio::select! {
                biased;
                result = self.queue.push(datagram) => result,
                () = self.cancel_token.cancelled() => {
                    self.stats.record_dropped();
                    warn!(%source, "shutdown while queue full, datagram dropped");
                    break;
                }
            };

            if pushed.is_err() {
                error!("dispatch queue closed, stopping listener");
                break;
            }
        }

        info!("listener stopped");
    }
}

/// Backoff after `consecutive` failed reads: 20ms, 40ms, ... capped.
fn read_backoff(consecutive: u32) -> Duration {
    Duration::from_millis(READ_BACKOFF_BASE_MS << consecutive.min(MAX_READ_BACKOFF_SHIFT))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::queue::{QueueReceiver, dispatch_queue};

    async fn bound(capacity: usize) -> (UdpListener, QueueReceiver, CancellationToken) {
        let (tx, rx) = dispatch_queue(capacity);
        let cancel = CancellationToken::new();
        let listener = UdpListener::bind(
            "127.0.0.1:0",
            2048,
            tx,
            cancel.clone(),
            Arc::new(PipelineStats::new()),
        )
        .await
        .unwrap();
        (listener, rx, cancel)
    }

    #[tokio::test]
    async fn test_datagrams_are_enqueued_with_source() {
        let (listener, rx, cancel) = bound(8).await;
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(listener.spin());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"first", addr).await.unwrap();
        client.send_to(b"second", addr).await.unwrap();

        let a = tokio::time::timeout(Duration::from_secs(2), rx.pull())
            .await
            .unwrap()
            .unwrap();
        let b = tokio::time::timeout(Duration::from_secs(2), rx.pull())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");
        assert_eq!(a.source, client.local_addr().unwrap());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_is_skipped() {
        let (tx, rx) = dispatch_queue(8);
        let cancel = CancellationToken::new();
        let stats = Arc::new(PipelineStats::new());
        let panel: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        let reads = VecDeque::from([
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            Ok((b"after".to_vec(), panel)),
        ]);
        let listener = UdpListener {
            socket: DatagramSource::Scripted(Mutex::new(reads)),
            queue: tx,
            cancel_token: cancel.clone(),
            stats: Arc::clone(&stats),
            max_datagram_size: 2048,
        };
        let task = tokio::spawn(listener.spin());

        let next = tokio::time::timeout(Duration::from_secs(2), rx.pull())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.payload, b"after");
        assert_eq!(next.source, panel);

        let snap = stats.snapshot();
        assert_eq!(snap.read_errors, 1);
        assert_eq!(snap.received, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_read_backoff_grows_and_caps() {
        assert_eq!(read_backoff(1), Duration::from_millis(20));
        assert_eq!(read_backoff(2), Duration::from_millis(40));
        assert_eq!(read_backoff(50), Duration::from_millis(640));
    }

    #[tokio::test]
    async fn test_cancel_closes_queue() {
        let (listener, rx, cancel) = bound(8).await;
        let task = tokio::spawn(listener.spin());

        cancel.cancel();
        task.await.unwrap();

        // Sender dropped with the listener
        assert!(rx.pull().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_while_queue_full() {
        let (listener, rx, cancel) = bound(1).await;
        let addr = listener.local_addr().unwrap();
        let stats = Arc::clone(&listener.stats);
        let task = tokio::spawn(listener.spin());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"one", addr).await.unwrap();
        client.send_to(b"two", addr).await.unwrap();

        // Wait until the second datagram is parked on the full queue
        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.snapshot().received < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(stats.snapshot().dropped_on_shutdown, 1);
        assert_eq!(rx.pull().await.unwrap().payload, b"one");
        assert!(rx.pull().await.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_transport_error() {
        let (first, _rx, _cancel) = bound(1).await;
        let taken = first.local_addr().unwrap().to_string();

        let (tx, _rx2) = dispatch_queue(1);
        let result = UdpListener::bind(
            &taken,
            2048,
            tx,
            CancellationToken::new(),
            Arc::new(PipelineStats::new()),
        )
        .await;
        assert!(matches!(result, Err(IngestError::Transport(_))));
    }
}
