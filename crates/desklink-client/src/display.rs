use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use desklink_nat::NatMapper;
use desklink_session::{ChannelListener, DisplayBackend, Session, SessionStream};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::forward::forward;
use crate::port::find_free_port;
use crate::rpc::{self, Capabilities};

/// Channel tag inbound display-tunnel connections arrive on.
pub const DISPLAY_CHANNEL: &str = "nx";

type ConnCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Exposes the local display backend to session peers.
///
/// Startup walks Binding (free port, backend bind, dial probe), Mapping
/// (best-effort NAT) and Serving (capability announcement plus the tunnel
/// accept loop). Binding failures are fatal and leave nothing running;
/// everything after Binding keeps the service alive without NAT.
pub struct DisplayService {
    backend: Arc<dyn DisplayBackend>,
    nat: Arc<NatMapper>,
    config: ClientConfig,
    local_port: Mutex<Option<u16>>,
    on_connection: Arc<Mutex<Option<ConnCallback>>>,
    shutdown: Mutex<Vec<oneshot::Sender<()>>>,
}

impl DisplayService {
    pub fn new(backend: Arc<dyn DisplayBackend>, nat: Arc<NatMapper>, config: ClientConfig) -> Self {
        Self {
            backend,
            nat,
            config,
            local_port: Mutex::new(None),
            on_connection: Arc::new(Mutex::new(None)),
            shutdown: Mutex::new(Vec::new()),
        }
    }

    /// Bind the backend, map the NAT port, and start serving tunnel and
    /// capability channels.
    pub async fn start(&self, session: &dyn Session, password: &str) -> Result<()> {
        if !self.shutdown.lock().expect("display state poisoned").is_empty() {
            return Err(ClientError::AlreadyStarted("display service"));
        }

        // Binding
        let start = self.config.display_port_start;
        let end = self.config.display_port_end;
        let port = find_free_port(start, end)
            .await
            .ok_or(ClientError::NoFreePort { start, end })?;

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        if let Err(e) = self.backend.bind(bind_addr, password).await {
            self.backend.terminate().await;
            return Err(ClientError::DisplayBind(e));
        }

        if let Err(e) = self.probe_backend(port).await {
            self.backend.terminate().await;
            return Err(e);
        }
        info!(port, "display backend bound");

        // Mapping (best-effort)
        if let Err(e) = self.nat.start(self.config.nat_external_port, port).await {
            info!("NAT mapping unavailable: {e}");
        }

        // Serving
        let capabilities = Capabilities {
            display_version: self.backend.version(),
            nat_endpoint: self.nat.external_endpoint(),
        };

        let rpc_listener = match session.listen_tcp(rpc::RPC_CHANNEL) {
            Ok(listener) => listener,
            Err(e) => {
                self.unwind_binding().await;
                return Err(e.into());
            }
        };
        let mut tunnel_listener = match session.listen_tcp(DISPLAY_CHANNEL) {
            Ok(listener) => listener,
            Err(e) => {
                self.unwind_binding().await;
                return Err(e.into());
            }
        };

        let (rpc_shutdown_tx, rpc_shutdown_rx) = oneshot::channel();
        let (tunnel_shutdown_tx, mut tunnel_shutdown_rx) = oneshot::channel();

        rpc::spawn_capability_server(rpc_listener, capabilities, rpc_shutdown_rx);

        let on_connection = Arc::clone(&self.on_connection);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = tunnel_listener.accept() => match result {
                        Ok(remote) => {
                            let peer = remote.peer_addr();
                            info!(%peer, "display tunnel connection accepted");

                            // Observability only; invoked before the dial.
                            let callback =
                                on_connection.lock().expect("display state poisoned").clone();
                            if let Some(callback) = callback {
                                callback(peer);
                            }

                            let local = match TcpStream::connect(("127.0.0.1", port)).await {
                                Ok(stream) => stream,
                                Err(e) => {
                                    error!("local display dial failed on port {port}: {e}");
                                    break;
                                }
                            };
                            tokio::spawn(forward(local, remote));
                        }
                        Err(e) => {
                            debug!("display tunnel accept loop ended: {e}");
                            break;
                        }
                    },
                    _ = &mut tunnel_shutdown_rx => {
                        debug!("display tunnel shutting down");
                        break;
                    }
                }
            }
        });

        *self.local_port.lock().expect("display state poisoned") = Some(port);
        *self.shutdown.lock().expect("display state poisoned") =
            vec![rpc_shutdown_tx, tunnel_shutdown_tx];
        Ok(())
    }

    /// Verify the backend actually accepts connections on its port.
    async fn probe_backend(&self, port: u16) -> Result<()> {
        let timeout = self.config.bind_probe_timeout();
        match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
            Ok(Ok(probe)) => {
                drop(probe);
                Ok(())
            }
            Ok(Err(e)) => Err(ClientError::BindProbe(e.to_string())),
            Err(_) => Err(ClientError::BindProbe(format!(
                "no answer on port {port} within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Roll back a completed Binding/Mapping when Serving setup fails, so a
    /// failed start leaves the service observably unstarted.
    async fn unwind_binding(&self) {
        self.nat.stop().await;
        self.backend.terminate().await;
        *self.local_port.lock().expect("display state poisoned") = None;
    }

    /// Register the new-tunnel-connection observer. Single subscriber, last
    /// registration wins.
    pub fn on_connection(&self, callback: impl Fn(SocketAddr) + Send + Sync + 'static) {
        *self.on_connection.lock().expect("display state poisoned") = Some(Arc::new(callback));
    }

    /// The bound display port while started.
    pub fn local_port(&self) -> Option<u16> {
        *self.local_port.lock().expect("display state poisoned")
    }

    /// Stop serving: close the accept loops, delete the NAT mapping, then
    /// terminate the backend (it owns the bound port). No-op when never
    /// started.
    pub async fn stop(&self) {
        let senders = std::mem::take(&mut *self.shutdown.lock().expect("display state poisoned"));
        if senders.is_empty() && self.local_port().is_none() {
            return;
        }
        for tx in senders {
            drop(tx.send(()));
        }
        self.nat.stop().await;
        self.backend.terminate().await;
        *self.local_port.lock().expect("display state poisoned") = None;
    }
}
