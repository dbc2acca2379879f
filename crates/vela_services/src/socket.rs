//! TCP socket listener.
//!
//! A built-in [`Service`] named `socket`. Each accepted connection gets an id
//! and its traffic is published on the bus:
//!
//! | Event | Payload |
//! |-------|---------|
//! | [`SOCKET_CONNECTED`] | `{"connection": id, "peer": "ip:port"}` |
//! | [`SOCKET_DATA_RECEIVED`] | `{"connection": id, "data": "..."}` |
//! | [`SOCKET_DISCONNECTED`] | `{"connection": id}` |
//!
//! Accept and connection loops run on the bus spawner and stop on shutdown,
//! which also drops the listening sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vela_events::{Event, EventBus};
use vela_system::api::API;

use crate::error::ServiceError;
use crate::service::Service;

/// Registry name of the socket service.
pub const SOCKET_SERVICE: &str = "socket";
/// A client connected.
pub const SOCKET_CONNECTED: &str = "socket.connected";
/// A client sent data.
pub const SOCKET_DATA_RECEIVED: &str = "socket.data.received";
/// A client went away.
pub const SOCKET_DISCONNECTED: &str = "socket.disconnected";

struct Connection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    token: CancellationToken,
    peer: SocketAddr,
}

struct SocketInner {
    bus: EventBus,
    shutdown: CancellationToken,
    listeners: Mutex<Vec<SocketAddr>>,
    connections: Mutex<IndexMap<u64, Connection>>,
    next_id: AtomicU64,
}

/// The `socket` built-in service.
///
/// Cheap to clone; clones share listeners and connections.
#[derive(Clone)]
pub struct SocketListener {
    inner: Arc<SocketInner>,
}

impl API for SocketListener {}

impl core::fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let peers: Vec<SocketAddr> = self
            .inner
            .connections
            .lock()
            .values()
            .map(|connection| connection.peer)
            .collect();
        f.debug_struct("SocketListener")
            .field("listeners", &*self.inner.listeners.lock())
            .field("peers", &peers)
            .finish()
    }
}

impl SocketListener {
    /// Creates a listener service publishing on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                bus,
                shutdown: CancellationToken::new(),
                listeners: Mutex::new(Vec::new()),
                connections: Mutex::new(IndexMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Binds `address` and starts accepting connections.
    ///
    /// Returns the bound address (useful with port 0). Must be called inside
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Bind`] if the address cannot be bound.
    pub fn listen(&self, address: &str) -> Result<SocketAddr, ServiceError> {
        let bind_error = |source| ServiceError::Bind {
            address: address.to_string(),
            source,
        };
        let std_listener = std::net::TcpListener::bind(address).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_error)?;
        let local = listener.local_addr()?;

        let inner = Arc::clone(&self.inner);
        self.inner
            .bus
            .spawner()
            .spawn_detached(
                &format!("socket-accept:{local}"),
                accept_loop(inner, listener).boxed(),
            )
            .map_err(|err| ServiceError::failed(SOCKET_SERVICE, err))?;

        tracing::info!(address = %local, "socket listener started");
        self.inner.listeners.lock().push(local);
        Ok(local)
    }

    /// Queues `data` for delivery on `connection`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::ConnectionClosed`] if the connection is gone.
    pub fn send(&self, connection: u64, data: impl Into<Vec<u8>>) -> Result<(), ServiceError> {
        let connections = self.inner.connections.lock();
        let target = connections
            .get(&connection)
            .ok_or(ServiceError::ConnectionClosed(connection))?;
        target
            .outbound
            .send(data.into())
            .map_err(|_| ServiceError::ConnectionClosed(connection))
    }

    /// Closes `connection`. Returns false if it was not open.
    pub fn close(&self, connection: u64) -> bool {
        match self.inner.connections.lock().shift_remove(&connection) {
            Some(open) => {
                open.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of open connections.
    #[must_use]
    pub fn connections(&self) -> Vec<u64> {
        self.inner.connections.lock().keys().copied().collect()
    }

    /// Bound listener addresses.
    #[must_use]
    pub fn listeners(&self) -> Vec<SocketAddr> {
        self.inner.listeners.lock().clone()
    }
}

async fn accept_loop(inner: Arc<SocketInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => open_connection(&inner, stream, peer),
            Err(err) => tracing::warn!(error = %err, "accept failed"),
        }
    }
    tracing::debug!(address = ?listener.local_addr().ok(), "socket listener released");
}

fn open_connection(inner: &Arc<SocketInner>, stream: TcpStream, peer: SocketAddr) {
    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    let (outbound, rx) = mpsc::unbounded_channel();
    let token = inner.shutdown.child_token();
    inner.connections.lock().insert(
        id,
        Connection {
            outbound,
            token: token.clone(),
            peer,
        },
    );
    tracing::debug!(connection = id, %peer, "socket connected");
    inner.bus.publish(Event::new(
        SOCKET_CONNECTED,
        json!({ "connection": id, "peer": peer.to_string() }),
    ));

    let work = connection_loop(Arc::clone(inner), id, stream, rx, token).boxed();
    if let Err(err) = inner
        .bus
        .spawner()
        .spawn_detached(&format!("socket-connection:{id}"), work)
    {
        tracing::debug!(connection = id, error = %err, "connection dropped");
        inner.connections.lock().shift_remove(&id);
    }
}

async fn connection_loop(
    inner: Arc<SocketInner>,
    id: u64,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    token: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0_u8; 8192];
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    inner.bus.publish(Event::new(
                        SOCKET_DATA_RECEIVED,
                        json!({
                            "connection": id,
                            "data": String::from_utf8_lossy(&buf[..n]),
                        }),
                    ));
                }
                Err(err) => {
                    tracing::debug!(connection = id, error = %err, "socket read failed");
                    break;
                }
            },
            data = outbound.recv() => match data {
                Some(data) => {
                    if let Err(err) = writer.write_all(&data).await {
                        tracing::debug!(connection = id, error = %err, "socket write failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    inner.connections.lock().shift_remove(&id);
    if !token.is_cancelled() {
        inner
            .bus
            .publish(Event::new(SOCKET_DISCONNECTED, json!({ "connection": id })));
    }
    tracing::debug!(connection = id, "socket closed");
}

fn connection_arg(method: &str, args: &Value) -> Result<u64, ServiceError> {
    args.get("connection")
        .and_then(Value::as_u64)
        .ok_or_else(|| ServiceError::invalid_arguments(SOCKET_SERVICE, method, "expected {\"connection\": number}"))
}

#[async_trait]
impl Service for SocketListener {
    fn name(&self) -> &str {
        SOCKET_SERVICE
    }

    fn methods(&self) -> Vec<String> {
        ["listen", "send", "close", "connections"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError> {
        match method {
            "listen" => {
                let address = args
                    .get("address")
                    .and_then(Value::as_str)
                    .unwrap_or("127.0.0.1:0");
                let bound = self.listen(address)?;
                Ok(json!({ "address": bound.to_string() }))
            }
            "send" => {
                let connection = connection_arg(method, &args)?;
                let data = args.get("data").and_then(Value::as_str).ok_or_else(|| {
                    ServiceError::invalid_arguments(SOCKET_SERVICE, method, "expected {\"data\": string}")
                })?;
                self.send(connection, data.as_bytes())?;
                Ok(json!({ "sent": data.len() }))
            }
            "close" => {
                let connection = connection_arg(method, &args)?;
                Ok(json!({ "closed": self.close(connection) }))
            }
            "connections" => Ok(json!(self.connections())),
            _ => Err(ServiceError::UnknownMethod {
                service: SOCKET_SERVICE.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.connections.lock().clear();
        self.inner.listeners.lock().clear();
    }
}

