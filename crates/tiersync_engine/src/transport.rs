//! Transport layer abstraction for sync operations.
//!
//! Outbound deltas go through [`SyncTransport::send`]. Inbound deltas are
//! delivered to [`crate::SyncCoordinator::run`] over a `tokio` channel, or
//! handed to [`crate::SyncCoordinator::receive`] directly.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiersync_protocol::Delta;
use tokio::sync::mpsc;

/// Carries deltas to other devices.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket, HTTP, in-process channels, mocks).
pub trait SyncTransport: Send + Sync {
    /// Sends a delta. Resolves once the transport has accepted it.
    fn send(&self, delta: &Delta) -> impl Future<Output = SyncResult<()>> + Send;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn send(&self, delta: &Delta) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).send(delta)
    }
}

/// A transport that forwards deltas into in-process channels, one per peer.
///
/// Useful for wiring coordinators together in one process.
#[derive(Debug, Clone, Default)]
pub struct ChannelTransport {
    peers: Vec<mpsc::Sender<Delta>>,
}

impl ChannelTransport {
    /// Creates a transport with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer inbox.
    pub fn with_peer(mut self, inbox: mpsc::Sender<Delta>) -> Self {
        self.peers.push(inbox);
        self
    }
}

impl SyncTransport for ChannelTransport {
    async fn send(&self, delta: &Delta) -> SyncResult<()> {
        for peer in &self.peers {
            peer.send(delta.clone())
                .await
                .map_err(|_| SyncError::transport_fatal("peer inbox closed"))?;
        }
        Ok(())
    }
}

/// A mock transport for testing.
///
/// Records every delta it accepts and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Delta>>,
    attempts: AtomicU64,
    failures_remaining: AtomicU32,
    fatal: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` sends with a retryable error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fails every send with a non-retryable error until cleared.
    pub fn set_fatal(&self, message: Option<&str>) {
        *self.fatal.lock() = message.map(str::to_string);
    }

    /// Delays every send by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Deltas accepted so far, in order.
    pub fn sent(&self) -> Vec<Delta> {
        self.sent.lock().clone()
    }

    /// Number of send calls, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SyncTransport for MockTransport {
    async fn send(&self, delta: &Delta) -> SyncResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.fatal.lock().clone() {
            return Err(SyncError::transport_fatal(message));
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::transport_retryable("injected failure"));
        }

        self.sent.lock().push(delta.clone());
        Ok(())
    }
}
