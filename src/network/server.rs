//! Message server
//!
//! Accepts connections and answers each request frame in arrival order.
//! Every connection gets its own session task; within a session, frames
//! are read, dispatched and answered strictly sequentially.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::Connection;
use super::NetworkConfig;
use crate::protocol::{is_reply, respond};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Server stopped
    Stopped,
    /// A new client has connected
    ClientConnected { addr: SocketAddr },
    /// A client has disconnected
    ClientDisconnected { addr: SocketAddr, reason: String },
    /// A request frame was answered
    RequestAnswered {
        addr: SocketAddr,
        request_id: u32,
        reply_id: u32,
    },
    /// A frame carried an id the registry does not know; no reply was sent
    UnknownMessage { addr: SocketAddr, message_id: u32 },
    /// Error occurred
    Error { message: String },
}

/// Message server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Number of sessions currently running
    sessions: Arc<RwLock<usize>>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            sessions: Arc::new(RwLock::new(0)),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start the server, returning the bound address.
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started { bind_addr: local_addr })
            .await;

        let config = self.config.clone();
        let sessions = self.sessions.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let config = config.clone();
                                let sessions = sessions.clone();
                                let event_tx = event_tx.clone();

                                tokio::spawn(async move {
                                    run_session(stream, addr, config, sessions, event_tx).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                let _ = event_tx.send(ServerEvent::Error {
                                    message: format!("Accept error: {}", e),
                                }).await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(local_addr)
    }

    /// Stop accepting connections. Sessions in flight run to completion.
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Number of sessions currently being served
    pub async fn session_count(&self) -> usize {
        *self.sessions.read().await
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Serve one client connection until it closes or fails.
///
/// Frames are answered strictly in arrival order. Unknown message ids are
/// reported and skipped; the session keeps going. Everything else that
/// stops the loop is folded into the disconnect reason.
async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    config: NetworkConfig,
    sessions: Arc<RwLock<usize>>,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    let mut conn = Connection::new(stream, addr, config.max_payload_size);
    let read_timeout = config.read_timeout();

    {
        let mut sessions = sessions.write().await;
        *sessions += 1;
    }

    let _ = event_tx.send(ServerEvent::ClientConnected { addr }).await;

    let disconnect_reason = loop {
        match conn.read_frame_timeout(read_timeout).await {
            Ok(Some(request)) => {
                match respond(&request) {
                    Some(reply) => {
                        if let Err(e) = conn.send_frame(&reply).await {
                            break format!("Send error: {}", e);
                        }
                        tracing::debug!(
                            "Answered 0x{:X} with 0x{:X} for {}",
                            request.id,
                            reply.id,
                            addr
                        );
                        let _ = event_tx.send(ServerEvent::RequestAnswered {
                            addr,
                            request_id: request.id,
                            reply_id: reply.id,
                        }).await;
                    }
                    None => {
                        if is_reply(request.id) {
                            tracing::warn!("Stray reply 0x{:X} from {}", request.id, addr);
                        } else {
                            tracing::warn!("Unknown message id 0x{:X} from {}", request.id, addr);
                        }
                        let _ = event_tx.send(ServerEvent::UnknownMessage {
                            addr,
                            message_id: request.id,
                        }).await;
                    }
                }
            }
            Ok(None) => {
                break "Connection closed".to_string();
            }
            Err(e) => {
                break format!("Error: {}", e);
            }
        }
    };

    let stats = conn.stats();
    tracing::info!(
        "Session with {} ended: {} ({} frames in / {} out, {} bytes in / {} out)",
        addr,
        disconnect_reason,
        stats.frames_read,
        stats.frames_written,
        stats.bytes_read,
        stats.bytes_written
    );

    {
        let mut sessions = sessions.write().await;
        *sessions -= 1;
    }

    let _ = event_tx.send(ServerEvent::ClientDisconnected {
        addr,
        reason: disconnect_reason,
    }).await;

    let _ = conn.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::read_frame_from;
    use crate::protocol::{encode_frame, reply_id, Message, MSG_ID_GET_VERSION, MSG_ID_TEST, VERSION_WORD};
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    async fn start_test_server(config: NetworkConfig) -> (Server, mpsc::Receiver<ServerEvent>, SocketAddr) {
        let mut server = Server::new(config);
        let events = server.take_event_receiver().unwrap();
        let addr = server.start().await.unwrap();
        (server, events, addr)
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap()
    }

    async fn send_message(stream: &mut TcpStream, message: &Message) {
        let mut buf = BytesMut::new();
        encode_frame(message, &mut buf);
        stream.write_all(&buf).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = Server::new(NetworkConfig::default());
        assert!(!server.is_running().await);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut server, mut events, _addr) = start_test_server(NetworkConfig::new(0)).await;
        assert!(server.is_running().await);
        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));

        server.stop().await.unwrap();
        assert!(matches!(events.recv().await, Some(ServerEvent::Stopped)));
        assert!(!server.is_running().await);

        // A second stop has nothing to stop.
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_answers_test_and_get_version() {
        let (_server, _events, addr) = start_test_server(NetworkConfig::new(0)).await;
        let mut stream = connect(addr).await;

        send_message(&mut stream, &Message::test(vec![0, 1])).await;
        let reply = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(reply.id, reply_id(MSG_ID_TEST));
        assert!(reply.payload.is_empty());

        send_message(&mut stream, &Message::get_version()).await;
        let reply = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(reply.id, reply_id(MSG_ID_GET_VERSION));
        assert_eq!(reply.payload, vec![VERSION_WORD]);
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let (_server, _events, addr) = start_test_server(NetworkConfig::new(0)).await;
        let mut stream = connect(addr).await;

        // Both requests on the wire before any reply is read; replies must
        // come back in request order.
        send_message(&mut stream, &Message::test(vec![9])).await;
        send_message(&mut stream, &Message::get_version()).await;

        let first = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(first.id, reply_id(MSG_ID_TEST));

        let second = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(second.id, reply_id(MSG_ID_GET_VERSION));
        assert_eq!(second.payload, vec![VERSION_WORD]);
    }

    #[tokio::test]
    async fn test_explicit_bind_address() {
        let config = NetworkConfig {
            bind_address: Some("127.0.0.1".to_string()),
            ..NetworkConfig::new(0)
        };
        let (_server, _events, addr) = start_test_server(config).await;
        assert!(addr.ip().is_loopback());

        let mut stream = connect(addr).await;
        send_message(&mut stream, &Message::get_version()).await;
        let reply = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(reply.payload, vec![VERSION_WORD]);
    }

    #[tokio::test]
    async fn test_unknown_id_is_skipped_not_fatal() {
        let (_server, mut events, addr) = start_test_server(NetworkConfig::new(0)).await;
        let mut stream = connect(addr).await;

        // Unknown id first, then a valid request on the same connection.
        send_message(&mut stream, &Message::new(0xDEAD, vec![])).await;
        send_message(&mut stream, &Message::get_version()).await;

        let reply = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(reply.id, reply_id(MSG_ID_GET_VERSION));

        // Started, ClientConnected, then the unknown id gets reported.
        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));
        assert!(matches!(events.recv().await, Some(ServerEvent::ClientConnected { .. })));
        match events.recv().await {
            Some(ServerEvent::UnknownMessage { message_id, .. }) => {
                assert_eq!(message_id, 0xDEAD);
            }
            other => panic!("expected UnknownMessage, got {:?}", other),
        }
        assert!(matches!(
            events.recv().await,
            Some(ServerEvent::RequestAnswered { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_count_tracks_connections() {
        let (server, mut events, addr) = start_test_server(NetworkConfig::new(0)).await;

        let stream = connect(addr).await;
        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));
        assert!(matches!(
            events.recv().await,
            Some(ServerEvent::ClientConnected { .. })
        ));
        assert_eq!(server.session_count().await, 1);

        drop(stream);
        match events.recv().await {
            Some(ServerEvent::ClientDisconnected { reason, .. }) => {
                assert_eq!(reason, "Connection closed");
            }
            other => panic!("expected ClientDisconnected, got {:?}", other),
        }
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_served() {
        let (_server, _events, addr) = start_test_server(NetworkConfig::new(0)).await;

        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        // The second client is answered while the first sits idle.
        send_message(&mut second, &Message::get_version()).await;
        let reply = read_frame_from(&mut second, 4096).await.unwrap().unwrap();
        assert_eq!(reply.payload, vec![VERSION_WORD]);

        send_message(&mut first, &Message::test(vec![42])).await;
        let reply = read_frame_from(&mut first, 4096).await.unwrap().unwrap();
        assert_eq!(reply.id, reply_id(MSG_ID_TEST));
    }

    #[tokio::test]
    async fn test_read_timeout_ends_idle_session() {
        let config = NetworkConfig::new(0).with_read_timeout(50);
        let (_server, mut events, addr) = start_test_server(config).await;

        let _stream = connect(addr).await;
        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));
        assert!(matches!(
            events.recv().await,
            Some(ServerEvent::ClientConnected { .. })
        ));

        match events.recv().await {
            Some(ServerEvent::ClientDisconnected { reason, .. }) => {
                assert!(reason.contains("timed out"), "unexpected reason: {}", reason);
            }
            other => panic!("expected ClientDisconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_session() {
        let (_server, mut events, addr) = start_test_server(NetworkConfig::new(0)).await;
        let mut stream = connect(addr).await;

        // Header claiming a payload far over the configured bound.
        let mut buf = BytesMut::new();
        encode_frame(&Message::new(MSG_ID_TEST, vec![]), &mut buf);
        buf[4..8].copy_from_slice(&(1u32 << 30).to_be_bytes());
        stream.write_all(&buf).await.unwrap();

        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));
        assert!(matches!(
            events.recv().await,
            Some(ServerEvent::ClientConnected { .. })
        ));
        match events.recv().await {
            Some(ServerEvent::ClientDisconnected { reason, .. }) => {
                assert!(reason.contains("too large"), "unexpected reason: {}", reason);
            }
            other => panic!("expected ClientDisconnected, got {:?}", other),
        }
    }
}
