//! Message client
//!
//! Connects to a server and drives request-reply exchanges one at a time:
//! send a request frame, await its reply, repeat. There is no background
//! task; the caller owns the pace of the exchange.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError, ConnectionStats};
use super::NetworkConfig;
use crate::protocol::{is_reply, reply_id, request_id, Message};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,

    #[error("Unexpected reply id 0x{got:X} (expected 0x{expected:X})")]
    UnexpectedReply { expected: u32, got: u32 },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Message client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Active connection, if any
    conn: Option<Connection>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        Self { config, conn: None }
    }

    /// Connect to a server by address
    pub async fn connect(&mut self, server_addr: SocketAddr) -> ClientResult<()> {
        if self.conn.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::info!("Connecting to {}", server_addr);

        // Connect with timeout
        let stream = match tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => return Err(ClientError::Timeout),
        };

        self.conn = Some(Connection::new(
            stream,
            server_addr,
            self.config.max_payload_size,
        ));

        Ok(())
    }

    /// Connect to a server by hostname
    pub async fn connect_hostname(&mut self, hostname: &str, port: u16) -> ClientResult<()> {
        let addr = super::resolve_host(hostname, port).await?;
        self.connect(addr).await
    }

    /// Send one request and await its reply.
    ///
    /// The reply id must be the request id with the reply bit set; anything
    /// else means the exchange is out of step. A failed exchange leaves the
    /// stream in an unknown state, so the connection is dropped on error.
    pub async fn request(&mut self, request: &Message) -> ClientResult<Message> {
        let read_timeout = self.config.read_timeout();
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;

        let result = exchange(conn, request, read_timeout).await;
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    /// Send a test message and await its (empty) acknowledgement.
    pub async fn send_test(&mut self, payload: Vec<u32>) -> ClientResult<()> {
        self.request(&Message::test(payload)).await?;
        Ok(())
    }

    /// Ask the server for its version word.
    pub async fn get_version(&mut self) -> ClientResult<u32> {
        let reply = self.request(&Message::get_version()).await?;
        reply
            .payload
            .first()
            .copied()
            .ok_or_else(|| ClientError::MalformedReply("missing version word".to_string()))
    }

    /// Disconnect from the server
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        match self.conn.take() {
            Some(mut conn) => {
                conn.close().await?;
                Ok(())
            }
            None => Err(ClientError::NotConnected),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Address of the connected server, if any
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|c| c.remote_addr())
    }

    /// Connection statistics, if connected
    pub fn stats(&self) -> Option<ConnectionStats> {
        self.conn.as_ref().map(|c| c.stats())
    }
}

async fn exchange(
    conn: &mut Connection,
    request: &Message,
    read_timeout: Option<Duration>,
) -> ClientResult<Message> {
    conn.send_frame(request).await?;

    match conn.read_frame_timeout(read_timeout).await? {
        Some(reply) if is_reply(reply.id) && request_id(reply.id) == request.id => Ok(reply),
        Some(reply) => Err(ClientError::UnexpectedReply {
            expected: reply_id(request.id),
            got: reply.id,
        }),
        None => Err(ClientError::Connection(ConnectionError::Closed)),
    }
}
