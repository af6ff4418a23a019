//! IPC server: line-delimited JSON over localhost TCP.
//!
//! Two channels share each connection: request/response (one in-flight
//! request per client, processed in arrival order) and subscribe
//! (unsolicited `sensor_update` pushes until the peer disconnects).
//!
//! Broadcast is best-effort and non-blocking: each subscriber has an
//! unbounded channel drained by its connection's writer task, and a
//! subscriber whose channel is gone is evicted at broadcast time. Peer
//! errors never propagate past the connection task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use wx_types::messages::BroadcastMessage;

use crate::daemon::Daemon;

const IPC_HOST: &str = "127.0.0.1";

struct SubscriberSet {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, mpsc::UnboundedSender<Arc<str>>>>,
}

impl SubscriberSet {
    async fn add(&self, tx: mpsc::UnboundedSender<Arc<str>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders.lock().await.insert(id, tx);
        id
    }

    async fn remove(&self, id: u64) {
        self.senders.lock().await.remove(&id);
    }

    async fn broadcast(&self, line: Arc<str>) {
        let mut senders = self.senders.lock().await;
        // A send only fails when the connection's writer task is gone;
        // that subscriber is dead and gets evicted here.
        senders.retain(|id, tx| {
            let alive = tx.send(line.clone()).is_ok();
            if !alive {
                debug!("evicting dead subscriber #{id}");
            }
            alive
        });
    }

    async fn clear(&self) {
        self.senders.lock().await.clear();
    }

    async fn len(&self) -> usize {
        self.senders.lock().await.len()
    }
}

pub struct IpcServer {
    subscribers: Arc<SubscriberSet>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl IpcServer {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(SubscriberSet {
                next_id: AtomicU64::new(1),
                senders: Mutex::new(HashMap::new()),
            }),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind and start accepting. Port 0 picks an ephemeral port; the
    /// bound address is available from [`IpcServer::local_addr`].
    pub async fn start(&self, port: u16, daemon: Arc<Daemon>) -> std::io::Result<()> {
        let listener = TcpListener::bind((IPC_HOST, port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(addr);
        info!("IPC server listening on {addr}");

        let subscribers = self.subscribers.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let subscribers = subscribers.clone();
                        let daemon = daemon.clone();
                        tokio::spawn(async move {
                            handle_client(stream, peer, subscribers, daemon).await;
                        });
                    }
                    Err(e) => {
                        warn!("IPC accept failed: {e}");
                    }
                }
            }
        });
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stop accepting and drop every subscriber.
    pub async fn stop(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        self.subscribers.clear().await;
        info!("IPC server stopped");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.len().await
    }

    /// Push a message to every subscriber, in poller production order
    /// per subscriber. Sends never block; a failed send evicts the
    /// subscriber and never escapes this routine.
    pub async fn broadcast(&self, message: &BroadcastMessage) {
        if self.subscribers.len().await == 0 {
            return;
        }
        match serde_json::to_string(message) {
            Ok(line) => self.subscribers.broadcast(Arc::from(line.as_str())).await,
            Err(e) => error!("failed to encode broadcast: {e}"),
        }
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    subscribers: Arc<SubscriberSet>,
    daemon: Arc<Daemon>,
) {
    debug!("IPC client connected: {peer}");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // All outbound traffic (replies and pushes) funnels through one
    // channel so the two never interleave mid-line.
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<str>>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut subscription: Option<u64> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("IPC read error from {peer}: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                send_value(&tx, json!({"ok": false, "error": "Invalid JSON"}));
                continue;
            }
        };

        let cmd = msg.get("cmd").and_then(Value::as_str).unwrap_or_default().to_string();

        match cmd.as_str() {
            "subscribe" => {
                if subscription.is_none() {
                    subscription = Some(subscribers.add(tx.clone()).await);
                }
                send_value(&tx, json!({"ok": true, "subscribed": true}));
            }
            "unsubscribe" => {
                if let Some(id) = subscription.take() {
                    subscribers.remove(id).await;
                }
                send_value(&tx, json!({"ok": true, "data": {}}));
            }
            "" => {
                send_value(&tx, json!({"ok": false, "error": "Missing command"}));
            }
            other => match daemon.dispatch(other, msg).await {
                Ok(data) => send_value(&tx, json!({"ok": true, "data": data})),
                Err(error) => {
                    error!("IPC handler error for {other}: {error}");
                    send_value(&tx, json!({"ok": false, "error": error}));
                }
            },
        }
    }

    if let Some(id) = subscription {
        subscribers.remove(id).await;
    }
    drop(tx);
    let _ = writer_task.await;
    debug!("IPC client disconnected: {peer}");
}

fn send_value(tx: &mpsc::UnboundedSender<Arc<str>>, value: Value) {
    let _ = tx.send(Arc::from(value.to_string().as_str()));
}
