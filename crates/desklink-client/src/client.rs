use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use desklink_nat::{GatewayDiscovery, IgdDiscovery, NatMapper};
use desklink_session::{Broker, DisplayBackend, Session};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::chat::ChatService;
use crate::config::ClientConfig;
use crate::display::DisplayService;
use crate::error::{ClientError, Result};

/// Description tag stamped on NAT mappings.
const MAPPING_DESCRIPTION: &str = "desklink";

/// Generated machine-password length.
const PASSWORD_LEN: usize = 8;

/// Top-level orchestrator owning the broker session and the services.
///
/// Single-owner lifecycle: construct, `start`, `stop`, discard (restart
/// after a clean stop is allowed). Identity accessors return empty strings
/// whenever no session is held.
pub struct DeskClient {
    broker: Arc<dyn Broker>,
    chat: ChatService,
    display: DisplayService,
    session: Mutex<Option<Arc<dyn Session>>>,
    started: AtomicBool,
}

impl DeskClient {
    /// Build a client that discovers NAT gateways over UPnP.
    pub fn new(
        broker: Arc<dyn Broker>,
        backend: Arc<dyn DisplayBackend>,
        config: ClientConfig,
    ) -> Self {
        Self::with_gateway_discovery(broker, backend, Box::new(IgdDiscovery::default()), config)
    }

    /// Build a client with a specific gateway discovery (tests substitute
    /// mocks here).
    pub fn with_gateway_discovery(
        broker: Arc<dyn Broker>,
        backend: Arc<dyn DisplayBackend>,
        discovery: Box<dyn GatewayDiscovery>,
        config: ClientConfig,
    ) -> Self {
        let nat = Arc::new(NatMapper::new(
            discovery,
            MAPPING_DESCRIPTION,
            config.nat_lease(),
        ));
        Self {
            broker,
            chat: ChatService::new(config.chat_recv_buffer, config.chat_peer_queue),
            display: DisplayService::new(backend, nat, config),
            session: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Create the session and start the display and chat services.
    ///
    /// On any failure everything already started is unwound; the client
    /// stays stopped and `start` may be retried.
    pub async fn start(&self, server_addr: &str, auth_token: &str, password: &str) -> Result<()> {
        if self.started() {
            return Err(ClientError::AlreadyStarted("client"));
        }

        let url = format!("https://{server_addr}");
        let session = self.broker.new_session(&url, auth_token).await?;
        info!(machine = session.id(), "session established");

        if let Err(e) = self.display.start(session.as_ref(), password).await {
            session.destroy().await;
            return Err(e);
        }
        if let Err(e) = self.chat.start(session.as_ref()) {
            self.display.stop().await;
            session.destroy().await;
            return Err(e);
        }

        *self.session.lock().expect("client state poisoned") = Some(session);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop all services and destroy the session. Idempotent.
    pub async fn stop(&self) {
        self.chat.stop();
        self.display.stop().await;

        let session = self.session.lock().expect("client state poisoned").take();
        if let Some(session) = session {
            session.destroy().await;
        }
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Machine identifier a remote peer uses to find this node; empty while
    /// stopped.
    pub fn machine_id(&self) -> String {
        self.session
            .lock()
            .expect("client state poisoned")
            .as_ref()
            .map(|s| s.id().to_string())
            .unwrap_or_default()
    }

    /// Credential a remote peer presents to join; empty while stopped.
    pub fn machine_auth(&self) -> String {
        self.session
            .lock()
            .expect("client state poisoned")
            .as_ref()
            .map(|s| s.auth_token().to_string())
            .unwrap_or_default()
    }

    /// Broadcast a chat message to every connected peer.
    pub fn chat_send(&self, msg: &str) {
        self.chat.send(msg);
    }

    /// Register the chat receive callback (last registration wins).
    pub fn on_chat_message(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        self.chat.on_receive(callback);
    }

    /// Register the display tunnel-connection observer.
    pub fn on_display_connection(&self, callback: impl Fn(SocketAddr) + Send + Sync + 'static) {
        self.display.on_connection(callback);
    }

    /// The locally bound display port while started.
    pub fn local_display_port(&self) -> Option<u16> {
        self.display.local_port()
    }

    /// Generate a one-time machine password for a sharing run.
    pub fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_alphanumeric_and_fresh() {
        let a = DeskClient::generate_password();
        let b = DeskClient::generate_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        // Not a strict guarantee, but a collision here points at a broken RNG.
        assert_ne!(a, b);
    }
}
