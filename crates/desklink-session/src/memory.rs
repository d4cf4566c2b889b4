//! In-process loopback session transport.
//!
//! Implements [`Broker`]/[`Session`]/[`ChannelListener`] over
//! `tokio::io::duplex` pipes. Each named channel is an mpsc queue of
//! connection halves: [`MemorySession::connect`] plays the remote peer and
//! pushes one half to whatever listener holds the tag. Destroying the
//! session drops every queue, which fails all pending accepts — the same
//! termination signal a real transport delivers.
//!
//! Used by the test suites and by demos; never by production wiring.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::{Broker, ChannelConn, ChannelListener, Session, SessionStream};

/// Pending connections a channel holds before `connect` blocks.
const CHANNEL_BACKLOG: usize = 16;

/// In-memory pipe buffer per direction.
const STREAM_BUFFER: usize = 64 * 1024;

/// Broker that manufactures loopback sessions with generated identities.
///
/// Created sessions are retained so a test can reach the "remote side" of
/// a session it handed to the code under test.
#[derive(Default)]
pub struct MemoryBroker {
    next_session: AtomicU64,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created session, if any.
    pub fn last_session(&self) -> Option<Arc<MemorySession>> {
        self.sessions
            .lock()
            .expect("broker registry poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn new_session(
        &self,
        _server_url: &str,
        _auth_token: &str,
    ) -> Result<Arc<dyn Session>> {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(MemorySession::new(
            format!("memory-{n:04}"),
            format!("auth-{n:04}"),
        ));
        self.sessions
            .lock()
            .expect("broker registry poisoned")
            .push(Arc::clone(&session));
        Ok(session)
    }
}

/// Loopback session: named channels are in-process pipe queues.
pub struct MemorySession {
    id: String,
    auth_token: String,
    channels: Mutex<HashMap<String, mpsc::Sender<ChannelConn>>>,
    destroyed: AtomicBool,
}

impl MemorySession {
    pub fn new(id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_token: auth_token.into(),
            channels: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Dial a named channel from the remote side.
    ///
    /// Fails if the session was destroyed or nothing listens on `tag`.
    pub async fn connect(&self, tag: &str) -> Result<ChannelConn> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let tx = self
            .channels
            .lock()
            .expect("channel registry poisoned")
            .get(tag)
            .cloned()
            .ok_or_else(|| SessionError::ChannelClosed(tag.to_string()))?;

        let (near, far) = tokio::io::duplex(STREAM_BUFFER);
        let accepted: ChannelConn = Box::new(MemoryStream::new(far));
        tx.send(accepted)
            .await
            .map_err(|_| SessionError::ChannelClosed(tag.to_string()))?;
        Ok(Box::new(MemoryStream::new(near)))
    }

    fn open(&self, tag: &str) -> Result<Box<dyn ChannelListener>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        let (tx, rx) = mpsc::channel(CHANNEL_BACKLOG);
        // Re-listening on a tag replaces the previous listener; its accept
        // fails once the old sender is dropped.
        self.channels
            .lock()
            .expect("channel registry poisoned")
            .insert(tag.to_string(), tx);
        Ok(Box::new(MemoryListener {
            tag: tag.to_string(),
            rx,
        }))
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn auth_token(&self) -> &str {
        &self.auth_token
    }

    fn listen(&self, tag: &str) -> Result<Box<dyn ChannelListener>> {
        self.open(tag)
    }

    fn listen_tcp(&self, tag: &str) -> Result<Box<dyn ChannelListener>> {
        self.open(tag)
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every listener's pending accept.
        self.channels
            .lock()
            .expect("channel registry poisoned")
            .clear();
        debug!(session = %self.id, "loopback session destroyed");
    }
}

struct MemoryListener {
    tag: String,
    rx: mpsc::Receiver<ChannelConn>,
}

#[async_trait]
impl ChannelListener for MemoryListener {
    async fn accept(&mut self) -> Result<ChannelConn> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| SessionError::ChannelClosed(self.tag.clone()))
    }
}

static NEXT_PEER_PORT: AtomicU16 = AtomicU16::new(40_000);

fn next_peer_addr() -> SocketAddr {
    SocketAddr::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        NEXT_PEER_PORT.fetch_add(1, Ordering::Relaxed),
    )
}

/// One half of a loopback pipe, tagged with a synthetic peer address.
pub struct MemoryStream {
    inner: DuplexStream,
    peer: SocketAddr,
}

impl MemoryStream {
    fn new(inner: DuplexStream) -> Self {
        Self {
            inner,
            peer: next_peer_addr(),
        }
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl SessionStream for MemoryStream {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn accept_connect_roundtrip() {
        let session = MemorySession::new("m-1", "a-1");
        let mut listener = session.listen("chat").unwrap();

        let mut remote = session.connect("chat").await.unwrap();
        let mut local = listener.accept().await.unwrap();

        remote.write_all(b"hello").await.unwrap();
        let mut buf = [0_u8; 5];
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        local.write_all(b"world").await.unwrap();
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn destroy_unblocks_pending_accept() {
        let session = Arc::new(MemorySession::new("m-2", "a-2"));
        let mut listener = session.listen("chat").unwrap();

        let pending = tokio::spawn(async move { listener.accept().await });
        tokio::task::yield_now().await;

        session.destroy().await;
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn connect_unknown_tag_fails() {
        let session = MemorySession::new("m-3", "a-3");
        let result = session.connect("nobody-listens").await;
        assert!(matches!(result, Err(SessionError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn destroyed_session_refuses_connect_and_listen() {
        let session = MemorySession::new("m-4", "a-4");
        let _listener = session.listen("chat").unwrap();
        session.destroy().await;

        assert!(matches!(
            session.connect("chat").await,
            Err(SessionError::SessionClosed)
        ));
        assert!(matches!(
            session.listen("chat"),
            Err(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn broker_assigns_distinct_identities() {
        let broker = MemoryBroker::new();
        let a = broker.new_session("https://broker", "public").await.unwrap();
        let b = broker.new_session("https://broker", "public").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.auth_token(), b.auth_token());
    }
}
