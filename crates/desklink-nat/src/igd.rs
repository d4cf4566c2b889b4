//! UPnP IGD gateway discovery and mapping.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{NatError, Result};
use crate::{Gateway, GatewayDiscovery, MappingProtocol};

/// How long to search the local network for an IGD device.
const GATEWAY_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

impl From<MappingProtocol> for igd_next::PortMappingProtocol {
    fn from(protocol: MappingProtocol) -> Self {
        match protocol {
            MappingProtocol::Tcp => igd_next::PortMappingProtocol::TCP,
            MappingProtocol::Udp => igd_next::PortMappingProtocol::UDP,
        }
    }
}

/// Discovers the first UPnP IGD gateway on the local network.
#[derive(Debug, Clone)]
pub struct IgdDiscovery {
    search_timeout: Duration,
}

impl IgdDiscovery {
    pub const fn new(search_timeout: Duration) -> Self {
        Self { search_timeout }
    }
}

impl Default for IgdDiscovery {
    fn default() -> Self {
        Self::new(GATEWAY_SEARCH_TIMEOUT)
    }
}

#[async_trait]
impl GatewayDiscovery for IgdDiscovery {
    async fn discover(&self) -> Result<Box<dyn Gateway>> {
        let options = igd_next::SearchOptions {
            timeout: Some(self.search_timeout),
            ..Default::default()
        };

        // The search's own timeout covers the common case; the outer one
        // covers devices that answer the probe and then stall the exchange.
        let gateway = tokio::time::timeout(
            self.search_timeout.saturating_add(Duration::from_secs(1)),
            igd_next::aio::tokio::search_gateway(options),
        )
        .await
        .map_err(|_| NatError::Discovery("gateway search timed out".to_string()))?
        .map_err(|e| NatError::Discovery(e.to_string()))?;

        Ok(Box::new(IgdGateway { inner: gateway }))
    }
}

struct IgdGateway {
    inner: igd_next::aio::Gateway<igd_next::aio::tokio::Tokio>,
}

#[async_trait]
impl Gateway for IgdGateway {
    async fn external_ip(&self) -> Result<IpAddr> {
        self.inner
            .get_external_ip()
            .await
            .map_err(|e| NatError::ExternalIp(e.to_string()))
    }

    async fn add_mapping(
        &self,
        protocol: MappingProtocol,
        external_port: u16,
        internal_port: u16,
        lease: Duration,
        description: &str,
    ) -> Result<()> {
        let local_ip = local_ipv4()?;
        let local_addr = SocketAddr::V4(SocketAddrV4::new(local_ip, internal_port));
        self.inner
            .add_port(
                protocol.into(),
                external_port,
                local_addr,
                lease.as_secs() as u32,
                description,
            )
            .await
            .map_err(|e| NatError::AddMapping {
                external_port,
                internal_port,
                reason: e.to_string(),
            })
    }

    async fn remove_mapping(&self, protocol: MappingProtocol, external_port: u16) -> Result<()> {
        self.inner
            .remove_port(protocol.into(), external_port)
            .await
            .map_err(|e| NatError::DeleteMapping {
                external_port,
                reason: e.to_string(),
            })
    }
}

/// Detect the local IPv4 address the gateway should forward to, by routing
/// a UDP socket at a public endpoint and reading back its source address.
/// No packet is sent.
pub(crate) fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| NatError::LocalAddress(e.to_string()))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|e| NatError::LocalAddress(e.to_string()))?;
    match socket
        .local_addr()
        .map_err(|e| NatError::LocalAddress(e.to_string()))?
    {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(_) => Err(NatError::LocalAddress(
            "resolved to an IPv6 address".to_string(),
        )),
    }
}
