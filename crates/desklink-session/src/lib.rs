//! Collaborator interfaces for the desklink client core.
//!
//! This crate defines the trait surface of the two external collaborators the
//! tunneling layer depends on:
//!
//! - The session transport: an authenticated, multiplexed connection to a
//!   broker ([`Broker`], [`Session`]) carrying independent named channels
//!   ([`ChannelListener`], [`SessionStream`]).
//!
//! - The remote-display backend ([`DisplayBackend`]): the process that
//!   actually renders and encodes the desktop, bound to a local TCP port.
//!
//! Concrete wire transports live outside this workspace. The [`memory`]
//! module provides an in-process loopback implementation used by tests and
//! demos.

pub mod error;
pub mod memory;

pub use error::{Result, SessionError};

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream to one remote peer on a named channel.
///
/// Dropping the stream closes it; there is no separate close call.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Address of the remote endpoint, as reported by the transport.
    fn peer_addr(&self) -> SocketAddr;
}

/// An accepted peer connection. Owned by the handler that accepted it.
pub type ChannelConn = Box<dyn SessionStream>;

/// Accept side of a named channel.
///
/// `accept` failing is the channel's termination signal: destroying the
/// owning session must cause every pending and future `accept` to return an
/// error, which the service accept loops interpret as "stop".
#[async_trait]
pub trait ChannelListener: Send {
    async fn accept(&mut self) -> Result<ChannelConn>;
}

/// An authenticated multiplexed session with the broker.
///
/// A session owns its named channels; `destroy` releases all of them and is
/// idempotent.
#[async_trait]
pub trait Session: Send + Sync {
    /// Machine identifier assigned by the broker.
    fn id(&self) -> &str;

    /// Credential a remote peer presents to join this session.
    fn auth_token(&self) -> &str;

    /// Open a stream-style named channel and return its accept side.
    fn listen(&self, tag: &str) -> Result<Box<dyn ChannelListener>>;

    /// Open a TCP-flavored named channel (used for tunnel and call-style
    /// traffic) and return its accept side.
    fn listen_tcp(&self, tag: &str) -> Result<Box<dyn ChannelListener>>;

    /// Tear the session down, releasing every channel.
    async fn destroy(&self);
}

/// Factory for sessions against a broker service.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn new_session(
        &self,
        server_url: &str,
        auth_token: &str,
    ) -> Result<Arc<dyn Session>>;
}

/// The local remote-display backend.
///
/// Process lifecycle (spawning, supervision) belongs to the implementation;
/// the tunneling layer only binds it, terminates it, and reads its version
/// for the capability announcement.
#[async_trait]
pub trait DisplayBackend: Send + Sync {
    /// Bind the display server to `addr`, protected by `password`.
    async fn bind(&self, addr: SocketAddr, password: &str) -> std::io::Result<()>;

    /// Terminate the display server. Must be safe to call after a failed
    /// or partial `bind`.
    async fn terminate(&self);

    /// Backend version string, announced to remote peers.
    fn version(&self) -> String;
}
