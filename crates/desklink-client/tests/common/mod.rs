//! Shared stubs for the integration suites: a display backend that echoes
//! on a real TCP port, a backend that refuses to bind, and canned NAT
//! gateway discoveries.

// Each suite compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use desklink_client::ClientConfig;
use desklink_nat::{Gateway, GatewayDiscovery, MappingProtocol, NatError, NatMapper};
use desklink_session::DisplayBackend;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const STUB_VERSION: &str = "stub-4.4";

/// Config with a test-specific probe range so parallel suites don't race
/// for the same display port.
pub fn config(display_port_start: u16) -> ClientConfig {
    ClientConfig {
        display_port_start,
        ..ClientConfig::default()
    }
}

/// Display backend that serves an echo loop on its bound port, or refuses
/// to bind at all.
pub struct StubBackend {
    fail_bind: bool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    pub bind_calls: AtomicUsize,
    pub terminate_calls: AtomicUsize,
}

impl StubBackend {
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            fail_bind: false,
            accept_task: Mutex::new(None),
            bind_calls: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_bind: true,
            accept_task: Mutex::new(None),
            bind_calls: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DisplayBackend for StubBackend {
    async fn bind(&self, addr: SocketAddr, _password: &str) -> std::io::Result<()> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_bind {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "display backend refused to bind",
            ));
        }

        let listener = TcpListener::bind(addr).await?;
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let (mut reader, mut writer) = stream.split();
                    drop(tokio::io::copy(&mut reader, &mut writer).await);
                });
            }
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn version(&self) -> String {
        STUB_VERSION.to_string()
    }
}

/// Discovery that never finds a gateway; NAT stays best-effort-absent.
pub struct NoGateway;

#[async_trait]
impl GatewayDiscovery for NoGateway {
    async fn discover(&self) -> desklink_nat::Result<Box<dyn Gateway>> {
        Err(NatError::Discovery("disabled in tests".to_string()))
    }
}

pub const FAKE_EXTERNAL_IP: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 2);

/// Gateway that records mappings in memory.
#[derive(Clone, Default)]
pub struct FakeGateway {
    pub mappings: Arc<Mutex<HashSet<u16>>>,
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn external_ip(&self) -> desklink_nat::Result<IpAddr> {
        Ok(IpAddr::V4(FAKE_EXTERNAL_IP))
    }

    async fn add_mapping(
        &self,
        _protocol: MappingProtocol,
        external_port: u16,
        _internal_port: u16,
        _lease: Duration,
        _description: &str,
    ) -> desklink_nat::Result<()> {
        self.mappings.lock().unwrap().insert(external_port);
        Ok(())
    }

    async fn remove_mapping(
        &self,
        _protocol: MappingProtocol,
        external_port: u16,
    ) -> desklink_nat::Result<()> {
        self.mappings.lock().unwrap().remove(&external_port);
        Ok(())
    }
}

pub struct FakeDiscovery {
    pub gateway: FakeGateway,
}

#[async_trait]
impl GatewayDiscovery for FakeDiscovery {
    async fn discover(&self) -> desklink_nat::Result<Box<dyn Gateway>> {
        Ok(Box::new(self.gateway.clone()))
    }
}

/// Mapper wired to no gateway at all.
pub fn nat_disabled() -> Arc<NatMapper> {
    Arc::new(NatMapper::new(
        Box::new(NoGateway),
        "desklink-test",
        Duration::from_secs(3600),
    ))
}

/// Mapper wired to an in-memory gateway; returns the gateway for
/// inspection.
pub fn nat_with_fake_gateway() -> (Arc<NatMapper>, FakeGateway) {
    let gateway = FakeGateway::default();
    let mapper = Arc::new(NatMapper::new(
        Box::new(FakeDiscovery {
            gateway: gateway.clone(),
        }),
        "desklink-test",
        Duration::from_secs(3600),
    ));
    (mapper, gateway)
}

/// Read one chunk as text, failing the test after two seconds.
pub async fn read_text<R>(conn: &mut R) -> String
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0_u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    String::from_utf8_lossy(&buf[..n]).to_string()
}
