//! The mapping lifecycle: discover, clean stale state, add, tear down.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::{Gateway, GatewayDiscovery, MappingProtocol};

struct ActiveMapping {
    gateway: Box<dyn Gateway>,
    external_port: u16,
    internal_port: u16,
    external_ip: std::net::IpAddr,
    /// False when the add step failed; the gateway handle is kept anyway so
    /// `stop` can still attempt a cleanup delete.
    mapped: bool,
}

/// Maintains at most one external-port → local-port mapping.
///
/// `start` fails fast when no gateway or external IP is reachable, so the
/// caller can immediately fall back to relayed traffic. `stop` is
/// idempotent and safe after a partially failed `start`.
pub struct NatMapper {
    discovery: Box<dyn GatewayDiscovery>,
    description: String,
    lease: Duration,
    state: Mutex<Option<ActiveMapping>>,
}

impl NatMapper {
    pub fn new(
        discovery: Box<dyn GatewayDiscovery>,
        description: impl Into<String>,
        lease: Duration,
    ) -> Self {
        Self {
            discovery,
            description: description.into(),
            lease,
            state: Mutex::new(None),
        }
    }

    /// Establish the mapping `external_port` → `internal_port` (TCP).
    ///
    /// A stale mapping for the same external port is deleted first; that
    /// delete failing usually just means no stale mapping existed and is
    /// logged, not returned.
    pub async fn start(&self, external_port: u16, internal_port: u16) -> Result<()> {
        let gateway = self.discovery.discover().await?;
        let external_ip = gateway.external_ip().await?;

        if let Err(e) = gateway
            .remove_mapping(MappingProtocol::Tcp, external_port)
            .await
        {
            info!("no stale mapping deleted for port {external_port}: {e}");
        }

        let added = gateway
            .add_mapping(
                MappingProtocol::Tcp,
                external_port,
                internal_port,
                self.lease,
                &self.description,
            )
            .await;
        let mapped = added.is_ok();

        if mapped {
            info!(
                external_ip = %external_ip,
                external_port,
                internal_port,
                lease_secs = self.lease.as_secs(),
                "NAT mapping established"
            );
        }

        *self.state.lock().expect("mapper state poisoned") = Some(ActiveMapping {
            gateway,
            external_port,
            internal_port,
            external_ip,
            mapped,
        });

        added
    }

    /// The mapped public endpoint, if `start` fully succeeded.
    pub fn external_endpoint(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .expect("mapper state poisoned")
            .as_ref()
            .filter(|m| m.mapped)
            .map(|m| SocketAddr::new(m.external_ip, m.external_port))
    }

    /// Delete the mapping, if a gateway was ever reached. Never raises:
    /// a failed delete leaves at worst a mapping that expires with its
    /// lease.
    pub async fn stop(&self) {
        let mapping = self.state.lock().expect("mapper state poisoned").take();
        let Some(m) = mapping else {
            return;
        };

        match m
            .gateway
            .remove_mapping(MappingProtocol::Tcp, m.external_port)
            .await
        {
            Ok(()) => debug!(
                external_port = m.external_port,
                internal_port = m.internal_port,
                "NAT mapping deleted"
            ),
            Err(e) => info!(
                "could not delete NAT mapping for port {}: {e}",
                m.external_port
            ),
        }
    }
}
