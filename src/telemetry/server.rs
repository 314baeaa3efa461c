//! WebSocket listener: one thread per observer, a shared registry for
//! broadcast fan-out, and an accept loop that polls the shutdown flag.
//!
//! Each connection's socket lives behind a mutex so the connection thread
//! (reading requests) and broadcasts (writing snapshots) never interleave
//! frames. Reads use a short timeout so the lock is released between polls.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tungstenite::{Message, WebSocket};

use crate::core::config::TelemetryConfig;
use crate::core::errors::{ChurnError, Result};
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::telemetry::protocol::{Dispatch, TelemetryProtocol};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedSocket = Arc<Mutex<WebSocket<TcpStream>>>;

// ──────────────────── observer registry ────────────────────

struct Observer {
    peer: String,
    socket: SharedSocket,
}

/// Currently connected observers, keyed by connection id.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<HashMap<u64, Observer>>,
}

impl ObserverRegistry {
    fn register(&self, id: u64, peer: String, socket: SharedSocket) -> usize {
        let mut observers = self.observers.write();
        observers.insert(id, Observer { peer, socket });
        observers.len()
    }

    fn unregister(&self, id: u64) -> usize {
        let mut observers = self.observers.write();
        observers.remove(&id);
        observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn peers(&self) -> Vec<String> {
        self.observers.read().values().map(|o| o.peer.clone()).collect()
    }

    /// Send `text` to every observer. No queuing and no retry; returns how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        let sockets: Vec<SharedSocket> = self
            .observers
            .read()
            .values()
            .map(|o| Arc::clone(&o.socket))
            .collect();
        sockets
            .iter()
            .filter(|socket| socket.lock().send(Message::text(text)).is_ok())
            .count()
    }

    fn close_all(&self) {
        let sockets: Vec<SharedSocket> = self
            .observers
            .read()
            .values()
            .map(|o| Arc::clone(&o.socket))
            .collect();
        for socket in sockets {
            let mut ws = socket.lock();
            let _ = ws.close(None);
            let _ = ws.flush();
        }
    }
}

// ──────────────────── server ────────────────────

pub struct TelemetryServer {
    listener: TcpListener,
    protocol: TelemetryProtocol,
    registry: Arc<ObserverRegistry>,
    logger: ActivityLoggerHandle,
    poll_interval: Duration,
    broadcast_interval: Option<Duration>,
    next_id: AtomicU64,
}

impl TelemetryServer {
    /// Bind the listener. A bind failure is fatal for the process.
    pub fn bind(
        config: &TelemetryConfig,
        protocol: TelemetryProtocol,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let address = format!("{}:{}", config.bind_address, config.websocket_port);
        let listener = TcpListener::bind(&address).map_err(|e| ChurnError::Bind {
            address: address.clone(),
            details: e.to_string(),
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ChurnError::Bind {
                address,
                details: e.to_string(),
            })?;
        Ok(Self {
            listener,
            protocol,
            registry: Arc::new(ObserverRegistry::default()),
            logger,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            broadcast_interval: (config.broadcast_interval_secs > 0)
                .then(|| Duration::from_secs(config.broadcast_interval_secs)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| ChurnError::Runtime {
            details: format!("listener has no local address: {e}"),
        })
    }

    pub fn registry(&self) -> Arc<ObserverRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept observers until shutdown, then close every connection and join its thread.
    pub fn run(&self, shutdown: &SignalHandler) {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut last_broadcast = Instant::now();

        while !shutdown.should_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.spawn_connection(stream, peer, shutdown) {
                    Ok(handle) => workers.push(handle),
                    Err(e) => eprintln!("[DCH-WS] {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    eprintln!("[DCH-WS] accept failed: {e}");
                    thread::sleep(self.poll_interval);
                }
            }

            if let Some(interval) = self.broadcast_interval
                && last_broadcast.elapsed() >= interval
            {
                last_broadcast = Instant::now();
                self.broadcast_snapshot();
            }
            workers.retain(|w| !w.is_finished());
        }

        self.registry.close_all();
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Push a `fileinfo` snapshot to every observer now.
    pub fn broadcast_snapshot(&self) -> usize {
        if self.registry.is_empty() {
            return 0;
        }
        match self.protocol.broadcast_snapshot().encode() {
            Ok(text) => self.registry.broadcast(&text),
            Err(e) => {
                eprintln!("[DCH-WS] broadcast encode failed: {e}");
                0
            }
        }
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &SignalHandler,
    ) -> Result<JoinHandle<()>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection {
            id,
            peer: peer.to_string(),
            protocol: self.protocol.clone(),
            registry: Arc::clone(&self.registry),
            logger: self.logger.clone(),
            shutdown: shutdown.clone(),
            poll_interval: self.poll_interval,
        };
        thread::Builder::new()
            .name(format!("dch-ws-{id}"))
            .spawn(move || connection.serve(stream))
            .map_err(|e| ChurnError::Runtime {
                details: format!("failed to spawn connection thread for {peer}: {e}"),
            })
    }
}

// ──────────────────── connection ────────────────────

struct Connection {
    id: u64,
    peer: String,
    protocol: TelemetryProtocol,
    registry: Arc<ObserverRegistry>,
    logger: ActivityLoggerHandle,
    shutdown: SignalHandler,
    poll_interval: Duration,
}

impl Connection {
    fn serve(self, stream: TcpStream) {
        let socket = match self.handshake(stream) {
            Ok(ws) => Arc::new(Mutex::new(ws)),
            Err(e) => {
                eprintln!("[DCH-WS] handshake with {} failed: {e}", self.peer);
                return;
            }
        };

        let observers = self
            .registry
            .register(self.id, self.peer.clone(), Arc::clone(&socket));
        self.logger.send(ActivityEvent::ObserverConnected {
            peer: self.peer.clone(),
            observers,
        });

        while !self.shutdown.should_shutdown() {
            let read = socket.lock().read();
            match read {
                Ok(Message::Text(text)) => {
                    if !self.answer(&socket, text.as_str()) {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    break;
                }
                Err(e) => {
                    eprintln!("[DCH-WS] read from {} failed: {e}", self.peer);
                    break;
                }
            }
        }

        let observers = self.registry.unregister(self.id);
        self.logger.send(ActivityEvent::ObserverDisconnected {
            peer: self.peer,
            observers,
        });
    }

    fn handshake(&self, stream: TcpStream) -> Result<WebSocket<TcpStream>> {
        let io_err = |e: io::Error| ChurnError::Runtime {
            details: format!("socket setup for {}: {e}", self.peer),
        };
        stream.set_nonblocking(false).map_err(io_err)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).map_err(io_err)?;
        let ws = tungstenite::accept(stream).map_err(|e| ChurnError::Protocol {
            details: e.to_string(),
        })?;
        ws.get_ref()
            .set_read_timeout(Some(self.poll_interval))
            .map_err(io_err)?;
        Ok(ws)
    }

    /// Dispatch one request. Returns `false` when the socket is no longer writable.
    fn answer(&self, socket: &SharedSocket, text: &str) -> bool {
        let Dispatch::Reply(envelope) = self.protocol.dispatch(text) else {
            return true;
        };
        if let Some(message) = envelope.message.as_ref().filter(|_| envelope.is_error()) {
            self.logger.send(ActivityEvent::ProtocolError {
                peer: self.peer.clone(),
                details: message.clone(),
            });
        }
        match envelope.encode() {
            Ok(reply) => socket.lock().send(Message::text(reply)).is_ok(),
            Err(e) => {
                eprintln!("[DCH-WS] encode failed for {}: {e}", self.peer);
                true
            }
        }
    }
}
