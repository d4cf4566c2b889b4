use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use desklink_session::{ChannelConn, ChannelListener, Session, SessionStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Channel tag the chat service listens on.
pub const CHAT_CHANNEL: &str = "chat";

type RecvCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Text chat over the session's "chat" channel.
///
/// Every accepted peer gets a registry entry holding a bounded outbound
/// queue; `send` broadcasts to all live entries, and a peer whose
/// connection fails is dropped from the registry by its own read loop.
/// A slow peer overflows its queue and loses messages rather than stalling
/// the broadcast.
pub struct ChatService {
    peers: Arc<Mutex<HashMap<u64, mpsc::Sender<String>>>>,
    on_recv: Arc<Mutex<Option<RecvCallback>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    recv_buffer: usize,
    peer_queue: usize,
}

impl ChatService {
    pub fn new(recv_buffer: usize, peer_queue: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            on_recv: Arc::new(Mutex::new(None)),
            shutdown_tx: Mutex::new(None),
            recv_buffer,
            peer_queue,
        }
    }

    /// Open the chat channel and spawn the accept loop.
    pub fn start(&self, session: &dyn Session) -> Result<()> {
        let mut slot = self.shutdown_tx.lock().expect("chat state poisoned");
        if slot.is_some() {
            return Err(ClientError::AlreadyStarted("chat service"));
        }

        let mut listener = session.listen(CHAT_CHANNEL)?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *slot = Some(shutdown_tx);
        drop(slot);

        let peers = Arc::clone(&self.peers);
        let on_recv = Arc::clone(&self.on_recv);
        let recv_buffer = self.recv_buffer;
        let peer_queue = self.peer_queue;

        tokio::spawn(async move {
            let mut next_peer: u64 = 0;
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok(conn) => {
                            next_peer += 1;
                            debug!(peer = next_peer, addr = %conn.peer_addr(), "chat peer connected");
                            spawn_peer(
                                next_peer,
                                conn,
                                peer_queue,
                                recv_buffer,
                                Arc::clone(&peers),
                                Arc::clone(&on_recv),
                            );
                        }
                        Err(e) => {
                            debug!("chat accept loop ended: {e}");
                            break;
                        }
                    },
                    _ = &mut shutdown_rx => {
                        debug!("chat service shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Broadcast `msg` to every connected peer, one delivery attempt each.
    ///
    /// Best-effort: a peer with a full queue loses this message, a peer
    /// whose connection already failed is skipped.
    pub fn send(&self, msg: &str) {
        let peers = self.peers.lock().expect("chat registry poisoned");
        for (peer, tx) in peers.iter() {
            match tx.try_send(msg.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer, "chat peer queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Register the receive callback. Single subscriber: the last
    /// registration wins.
    pub fn on_receive(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        *self.on_recv.lock().expect("chat state poisoned") = Some(Arc::new(callback));
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("chat registry poisoned").len()
    }

    /// Stop the accept loop and forget all peers. Destroying the session
    /// reaches the same state by failing the accept and read loops.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().expect("chat state poisoned").take() {
            drop(tx.send(()));
        }
        self.peers.lock().expect("chat registry poisoned").clear();
    }
}

fn spawn_peer(
    peer: u64,
    conn: ChannelConn,
    peer_queue: usize,
    recv_buffer: usize,
    peers: Arc<Mutex<HashMap<u64, mpsc::Sender<String>>>>,
    on_recv: Arc<Mutex<Option<RecvCallback>>>,
) {
    let (mut read_half, mut write_half) = tokio::io::split(conn);
    let (tx, mut rx) = mpsc::channel::<String>(peer_queue);
    peers.lock().expect("chat registry poisoned").insert(peer, tx);

    // Writer: drains the outbound queue. Ends when the registry entry is
    // removed (sender dropped) or the peer stops accepting writes.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write_half.write_all(msg.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Reader: delivers inbound text to the registered callback, and owns
    // deregistration on failure.
    tokio::spawn(async move {
        let mut buf = vec![0_u8; recv_buffer];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    debug!(peer, "chat peer disconnected");
                    break;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n])
                        .trim_end()
                        .to_string();
                    let callback = on_recv.lock().expect("chat state poisoned").clone();
                    if let Some(callback) = callback {
                        callback(text);
                    }
                }
            }
        }
        peers.lock().expect("chat registry poisoned").remove(&peer);
    });
}
