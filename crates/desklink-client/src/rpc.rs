//! Capability announcement over the "rpc" channel.
//!
//! One call-style method: a peer sends [`CapabilityRequest::Capabilities`]
//! and receives the node's immutable [`Capabilities`] snapshot. Frames are
//! JSON payloads behind a 4-byte big-endian length prefix.

use std::net::SocketAddr;

use desklink_session::{ChannelConn, ChannelListener, SessionStream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Channel tag the capability service listens on.
pub const RPC_CHANNEL: &str = "rpc";

/// Maximum allowed frame size (64 KB).
const MAX_FRAME_SIZE: u32 = 65_536;

/// Node features announced to remote peers. Captured once when the display
/// service reaches its serving state; read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Version string reported by the display backend.
    pub display_version: String,
    /// Public endpoint of the NAT mapping, when one was established —
    /// peers that can reach it may connect directly instead of through
    /// the broker.
    pub nat_endpoint: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityRequest {
    Capabilities,
}

/// Send a value as a length-prefixed JSON frame.
pub async fn send_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|e| ClientError::Codec(e.to_string()))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed JSON frame.
pub async fn recv_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(ClientError::Protocol(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    let mut buf = vec![0_u8; len as usize];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(|e| ClientError::Codec(e.to_string()))
}

/// Query a node's capabilities over an open rpc-channel connection.
/// This is the viewer side of the exchange.
pub async fn query_capabilities<S>(conn: &mut S) -> Result<Capabilities>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    send_frame(conn, &CapabilityRequest::Capabilities).await?;
    recv_frame(conn).await
}

/// Spawn the capability accept loop: every connection is served
/// independently, answering sequential requests with the same snapshot
/// until the peer hangs up.
pub(crate) fn spawn_capability_server(
    mut listener: Box<dyn ChannelListener>,
    capabilities: Capabilities,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok(conn) => {
                        debug!(addr = %conn.peer_addr(), "capability peer connected");
                        let capabilities = capabilities.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(conn, &capabilities).await {
                                debug!("capability connection closed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        debug!("capability accept loop ended: {e}");
                        break;
                    }
                },
                _ = &mut shutdown_rx => {
                    debug!("capability service shutting down");
                    break;
                }
            }
        }
    });
}

async fn serve_connection(mut conn: ChannelConn, capabilities: &Capabilities) -> Result<()> {
    loop {
        let CapabilityRequest::Capabilities = recv_frame(&mut conn).await?;
        send_frame(&mut conn, capabilities).await?;
    }
}
