//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Enforce the per-process connection limit
//! - Report `New` / `Closed` transitions to the connection-state hook
//! - Let the server wait for the last connection when draining
//!
//! # Design Decisions
//! - The slot and the `Closed` report live in a guard carried by the stream,
//!   so they are released whatever way the connection ends
//! - Waiting for a slot applies backpressure instead of rejecting

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::http::view::ConnStateHook;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state reported to the connection-state hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and holding a slot.
    New,
    /// Closed; its slot is free again.
    Closed,
}

struct TrackerInner {
    limit: Arc<Semaphore>,
    active: AtomicU64,
    idle: Notify,
    hook: Option<ConnStateHook>,
}

/// Tracks active connections for limits and graceful shutdown.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize, hook: Option<ConnStateHook>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                limit: Arc::new(Semaphore::new(max_connections)),
                active: AtomicU64::new(0),
                idle: Notify::new(),
                hook,
            }),
        }
    }

    /// Wait for a free slot and record a new connection. The returned guard
    /// releases the slot when dropped.
    pub async fn track(&self) -> ConnectionGuard {
        let permit = Arc::clone(&self.inner.limit)
            .acquire_owned()
            .await
            .expect("connection semaphore is never closed");
        let id = ConnectionId::new();
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %id, active, "Connection opened");
        if let Some(hook) = &self.inner.hook {
            hook(id, ConnState::New);
        }
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id,
            _permit: permit,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn available_slots(&self) -> usize {
        self.inner.limit.available_permits()
    }

    /// Wait until no connection is open.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("active", &self.active_count())
            .field("available_slots", &self.available_slots())
            .finish()
    }
}

/// Guard that tracks a connection's lifetime.
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionGuard").field(&self.id).finish()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, active, "Connection closed");
        if let Some(hook) = &self.inner.hook {
            hook(self.id, ConnState::Closed);
        }
        if active == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// An I/O stream that holds a connection slot until dropped.
#[derive(Debug)]
pub struct TrackedStream<I> {
    inner: I,
    guard: ConnectionGuard,
}

impl<I> TrackedStream<I> {
    pub fn new(inner: I, guard: ConnectionGuard) -> Self {
        Self { inner, guard }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub fn get_ref(&self) -> &I {
        &self.inner
    }
}

impl<I: AsyncRead + Unpin> AsyncRead for TrackedStream<I> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<I: AsyncWrite + Unpin> AsyncWrite for TrackedStream<I> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// axum-server acceptor that wraps every accepted stream in a
/// [`TrackedStream`]. Compose it under `RustlsAcceptor` for TLS.
#[derive(Debug, Clone)]
pub struct TrackingAcceptor {
    tracker: ConnectionTracker,
}

impl TrackingAcceptor {
    pub fn new(tracker: ConnectionTracker) -> Self {
        Self { tracker }
    }
}

impl<I, S> axum_server::accept::Accept<I, S> for TrackingAcceptor
where
    I: Send + 'static,
    S: Send + 'static,
{
    type Stream = TrackedStream<I>;
    type Service = S;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let tracker = self.tracker.clone();
        Box::pin(async move {
            let guard = tracker.track().await;
            Ok((TrackedStream::new(stream, guard), service))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new(10, None);
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track().await;
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track().await;
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tracker.available_slots(), 8);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn limit_applies_backpressure() {
        let tracker = ConnectionTracker::new(1, None);
        let first = tracker.track().await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), tracker.track()).await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), tracker.track()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn hook_sees_new_then_closed() {
        let seen: Arc<Mutex<Vec<ConnState>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let hook: ConnStateHook = Arc::new(move |_id: ConnectionId, state: ConnState| sink.lock().unwrap().push(state));
        let tracker = ConnectionTracker::new(4, Some(hook));

        drop(tracker.track().await);
        assert_eq!(*seen.lock().unwrap(), [ConnState::New, ConnState::Closed]);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_close() {
        let tracker = ConnectionTracker::new(4, None);
        let guard = tracker.track().await;

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
