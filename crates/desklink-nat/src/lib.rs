//! Best-effort NAT port mapping.
//!
//! [`NatMapper`] establishes a single router-level mapping from a fixed
//! external port to the local display-service port, with a bounded lease.
//! NAT devices are unreliable and heterogeneous, so nothing here may block
//! the rest of the system: discovery and mapping failures are reported to
//! the caller to log, and teardown never raises.
//!
//! Gateway access sits behind the [`Gateway`]/[`GatewayDiscovery`] traits;
//! [`IgdDiscovery`] is the production implementation over UPnP IGD.

pub mod error;
pub mod igd;
pub mod mapper;

pub use error::{NatError, Result};
pub use igd::IgdDiscovery;
pub use mapper::NatMapper;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

/// Transport protocol of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingProtocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for MappingProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingProtocol::Tcp => write!(f, "TCP"),
            MappingProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// A NAT-capable gateway device.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// The gateway's public-facing address.
    async fn external_ip(&self) -> Result<IpAddr>;

    /// Forward `external_port` on the gateway to `internal_port` on this
    /// host for `lease`. Resolving which local address to forward to is the
    /// implementation's concern.
    async fn add_mapping(
        &self,
        protocol: MappingProtocol,
        external_port: u16,
        internal_port: u16,
        lease: Duration,
        description: &str,
    ) -> Result<()>;

    /// Remove the forward for `external_port`. Removing a mapping that does
    /// not exist is an error on most devices; callers treat it as benign.
    async fn remove_mapping(&self, protocol: MappingProtocol, external_port: u16) -> Result<()>;
}

/// Locates a [`Gateway`] on the local network ("any" discovery).
#[async_trait]
pub trait GatewayDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Box<dyn Gateway>>;
}
