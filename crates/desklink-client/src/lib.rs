//! Desktop-sharing client core.
//!
//! Multiplexes three services over one authenticated broker session:
//!
//! - [`display::DisplayService`] — binds the local display backend to a
//!   discovered free port, maps an external NAT port to it best-effort, and
//!   tunnels every inbound connection on the display channel to the backend
//!   with symmetric bidirectional copy.
//! - [`chat::ChatService`] — text chat broadcast to every connected peer.
//! - The capability announcement ([`rpc`]) — a read-only snapshot of node
//!   features served over a call-style channel.
//!
//! [`client::DeskClient`] owns the session and the services and is the
//! surface an embedding shell (GUI or otherwise) drives.

pub mod chat;
pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod forward;
pub mod port;
pub mod rpc;

pub use chat::ChatService;
pub use client::DeskClient;
pub use config::ClientConfig;
pub use display::DisplayService;
pub use error::{ClientError, Result};
pub use rpc::Capabilities;
