//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Each link runs a reader task and a writer task on the Tokio runtime.
//! Readers forward frames into one event channel that [`Transport::poll`]
//! drains without blocking; [`Transport::send`] pushes frames into a
//! bounded per-link queue, so a slow peer surfaces as
//! [`TransportError::WouldBlock`] instead of unbounded memory growth.
//!
//! WebSocket has no unreliable class, so unreliable sends are delivered
//! reliably.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{ConnectionId, Reliability, Transport, TransportError, TransportEvent};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frames a single link may queue before sends report `WouldBlock`.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

type Writers = Arc<Mutex<HashMap<ConnectionId, mpsc::Sender<Message>>>>;

/// A polled WebSocket transport that can listen, dial, or both.
///
/// Must be created inside a Tokio runtime.
pub struct WebSocketTransport {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    writers: Writers,
    listener: Option<(SocketAddr, JoinHandle<()>)>,
}

impl WebSocketTransport {
    /// Creates a transport with no listener and no links.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx,
            writers: Arc::new(Mutex::new(HashMap::new())),
            listener: None,
        }
    }

    /// Binds a listener; every accepted peer shows up as
    /// [`TransportEvent::Connected`] on a later poll.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let mut transport = Self::new();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local = listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local, "WebSocket transport listening");

        let events_tx = transport.events_tx.clone();
        let writers = Arc::clone(&transport.writers);
        let task = tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        continue;
                    }
                };
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        let id = spawn_link(ws, events_tx.clone(), Arc::clone(&writers));
                        tracing::debug!(%id, %addr, "accepted WebSocket connection");
                    }
                    Err(e) => {
                        tracing::warn!(%addr, error = %e, "WebSocket handshake failed");
                    }
                }
            }
        });
        transport.listener = Some((local, task));
        Ok(transport)
    }

    /// Dials `addr` (`host:port`) and returns the id of the new link.
    pub async fn connect(&mut self, addr: &str) -> Result<ConnectionId, TransportError> {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        let id = spawn_link(ws, self.events_tx.clone(), Arc::clone(&self.writers));
        tracing::debug!(%id, addr, "dialed WebSocket connection");
        Ok(id)
    }

    /// The address the listener is bound to, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|(addr, _)| *addr)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some((_, task)) = self.listener.take() {
            task.abort();
        }
    }
}

impl Transport for WebSocketTransport {
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
        _reliability: Reliability,
    ) -> Result<(), TransportError> {
        let writers = lock(&self.writers);
        let tx = writers
            .get(&connection)
            .ok_or(TransportError::ConnectionClosed(connection))?;
        tx.try_send(Message::Binary(data.to_vec().into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::WouldBlock(connection),
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::ConnectionClosed(connection)
                }
            })
    }

    fn poll(&mut self, max_events: usize) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while events.len() < max_events {
            match self.events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    fn close(&mut self, connection: ConnectionId) -> Result<(), TransportError> {
        let tx = lock(&self.writers)
            .remove(&connection)
            .ok_or(TransportError::ConnectionClosed(connection))?;
        // The writer task flushes the close frame and exits once the
        // sender is dropped.
        let _ = tx.try_send(Message::Close(None));
        tracing::debug!(%connection, "WebSocket connection closed locally");
        Ok(())
    }
}

/// Registers a link, spawns its reader/writer tasks and announces it.
fn spawn_link<S>(
    ws: WebSocketStream<S>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    writers: Writers,
) -> ConnectionId
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);

    lock(&writers).insert(id, out_tx);
    let _ = events_tx.send(TransportEvent::Connected(id));

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                tracing::debug!(%id, error = %e, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let event = TransportEvent::Message {
                        connection: id,
                        data: data.into(),
                    };
                    if events_tx.send(event).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue, // text, ping, pong, raw frames
                Some(Err(e)) => {
                    tracing::debug!(%id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
        lock(&writers).remove(&id);
        let _ = events_tx.send(TransportEvent::Disconnected(id));
    });

    id
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
