//! Connection handling
//!
//! Wraps one TCP stream with frame-level reads and writes:
//! - exact-length reads that survive partial reads
//! - header decode and size sanity before the payload buffer is allocated
//! - replies written as one buffered send

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{decode_words, encode_frame, CodecError, Header, Message, HEADER_SIZE, WORD_SIZE};

/// Frame-read errors, separating peer close from transport failure
#[derive(Error, Debug)]
pub enum ReadError {
    /// The peer closed the stream with `bytes_read` of the requested length
    /// read. A partially read frame is discarded by the caller.
    #[error("Connection closed by peer after {bytes_read} bytes")]
    Closed { bytes_read: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read exactly `buf.len()` bytes from `stream`.
///
/// Loops over partial reads until the buffer fills. A zero-byte read while
/// bytes remain means the peer closed the connection and yields
/// [`ReadError::Closed`], never a silently short buffer. A zero-length
/// request succeeds without touching the stream. No deadline of its own;
/// the caller bounds the wait if it wants one.
pub async fn read_exact<R>(stream: &mut R, buf: &mut [u8]) -> Result<(), ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ReadError::Closed { bytes_read: filled });
        }
        filled += n;
    }
    Ok(())
}

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed mid-frame")]
    Closed,

    #[error("Read timed out")]
    Timeout,
}

impl From<ReadError> for ConnectionError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Closed { .. } => ConnectionError::Closed,
            ReadError::Io(e) => ConnectionError::Io(e),
        }
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Read one complete frame from any byte stream.
///
/// Returns `Ok(None)` when the peer closes cleanly between frames. A close
/// after the first header byte means a discarded partial frame and is
/// reported as [`ConnectionError::Closed`]. The header's payload size is
/// validated against `max_payload_size` before the payload buffer exists.
pub async fn read_frame_from<R>(
    stream: &mut R,
    max_payload_size: usize,
) -> ConnectionResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    match read_exact(stream, &mut header_buf).await {
        Ok(()) => {}
        Err(ReadError::Closed { bytes_read: 0 }) => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = Header::decode(&header_buf);
    header.validate(max_payload_size)?;

    let mut payload_buf = vec![0u8; header.payload_size as usize];
    read_exact(stream, &mut payload_buf).await?;

    Ok(Some(Message::new(
        header.message_id,
        decode_words(&payload_buf),
    )))
}

/// Connection statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionStats {
    /// Frames read
    pub frames_read: u64,
    /// Frames written
    pub frames_written: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Bytes written
    pub bytes_written: u64,
}

/// One framed connection to a remote peer
pub struct Connection {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The TCP stream
    stream: TcpStream,
    /// Write buffer, reused across sends
    write_buf: BytesMut,
    /// Upper bound for an inbound payload, in bytes
    max_payload_size: usize,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap an established TCP stream.
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, max_payload_size: usize) -> Self {
        Self {
            remote_addr,
            stream,
            write_buf: BytesMut::with_capacity(4096),
            max_payload_size,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get connection statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Read one complete frame; `Ok(None)` on a clean close between frames.
    pub async fn read_frame(&mut self) -> ConnectionResult<Option<Message>> {
        let frame = read_frame_from(&mut self.stream, self.max_payload_size).await?;

        if let Some(message) = &frame {
            self.stats.frames_read += 1;
            self.stats.bytes_read += (HEADER_SIZE + message.payload.len() * WORD_SIZE) as u64;
        }

        Ok(frame)
    }

    /// Read one complete frame, bounded by `timeout` when one is configured.
    pub async fn read_frame_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> ConnectionResult<Option<Message>> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.read_frame()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout),
            },
            None => self.read_frame().await,
        }
    }

    /// Write one complete frame (header + payload) as a single send.
    pub async fn send_frame(&mut self, message: &Message) -> ConnectionResult<()> {
        self.write_buf.clear();
        encode_frame(message, &mut self.write_buf);

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_written += 1;
        self.stats.bytes_written += self.write_buf.len() as u64;

        Ok(())
    }

    /// Shut down the write half, signalling end of exchange to the peer.
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tokio_test::io::Builder;

    fn frame_bytes(message: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(message, &mut buf);
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_read_exact_across_partial_reads() {
        let mut stream = Builder::new()
            .read(&[1, 2, 3])
            .read(&[4])
            .read(&[5, 6, 7, 8])
            .build();

        let mut buf = [0u8; 8];
        read_exact(&mut stream, &mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_read_exact_zero_length() {
        // Never touches the stream: an empty mock would fail any read.
        let mut stream = Builder::new().build();
        let mut buf = [0u8; 0];
        read_exact(&mut stream, &mut buf).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_exact_detects_peer_close() {
        // 5 of 8 bytes, then EOF: Closed, not Io, and not a short success.
        let mut stream = Builder::new().read(&[1, 2, 3, 4, 5]).build();

        let mut buf = [0u8; 8];
        let err = read_exact(&mut stream, &mut buf).await.unwrap_err();
        assert!(matches!(err, ReadError::Closed { bytes_read: 5 }));
    }

    #[tokio::test]
    async fn test_read_exact_immediate_close() {
        let mut stream = Builder::new().build();

        let mut buf = [0u8; 8];
        let err = read_exact(&mut stream, &mut buf).await.unwrap_err();
        assert!(matches!(err, ReadError::Closed { bytes_read: 0 }));
    }

    #[tokio::test]
    async fn test_read_frame_decodes_message() {
        let sent = Message::test(vec![7, 8, 9]);
        let mut stream = Builder::new().read(&frame_bytes(&sent)).build();

        let got = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn test_read_frame_survives_fragmentation() {
        // Frame delivered one byte at a time, header split from payload.
        let sent = Message::test(vec![0xAABBCCDD]);
        let bytes = frame_bytes(&sent);

        let mut builder = Builder::new();
        for chunk in bytes.chunks(1) {
            builder.read(chunk);
        }
        let mut stream = builder.build();

        let got = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn test_read_frame_clean_close() {
        // EOF before any header byte is the normal end of a session.
        let mut stream = Builder::new().build();
        let frame = read_frame_from(&mut stream, 4096).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_read_frame_close_mid_header() {
        let mut stream = Builder::new().read(&[0x00, 0x09, 0x99]).build();
        let err = read_frame_from(&mut stream, 4096).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_read_frame_close_mid_payload() {
        let bytes = frame_bytes(&Message::test(vec![1, 2]));
        // Full header, half the payload, then EOF.
        let mut stream = Builder::new().read(&bytes[..HEADER_SIZE + 4]).build();

        let err = read_frame_from(&mut stream, 4096).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_payload() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(0x99990);
        bytes.put_u32(1 << 30); // 1 GiB claimed
        let mut stream = Builder::new().read(&bytes).build();

        let err = read_frame_from(&mut stream, 4096).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Codec(CodecError::PayloadTooLarge(..))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_misaligned_payload() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(0x99990);
        bytes.put_u32(6);
        let mut stream = Builder::new().read(&bytes).build();

        let err = read_frame_from(&mut stream, 4096).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Codec(CodecError::MisalignedPayload(6))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_empty_payload() {
        let sent = Message::get_version();
        let mut stream = Builder::new().read(&frame_bytes(&sent)).build();

        let got = read_frame_from(&mut stream, 4096).await.unwrap().unwrap();
        assert_eq!(got.id, sent.id);
        assert!(got.payload.is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_frames_stay_in_order() {
        // Two frames in one read: the second must not be consumed until the
        // first has been returned.
        let first = Message::test(vec![1]);
        let second = Message::get_version();
        let mut bytes = frame_bytes(&first);
        bytes.extend_from_slice(&frame_bytes(&second));
        let mut stream = Builder::new().read(&bytes).build();

        assert_eq!(
            read_frame_from(&mut stream, 4096).await.unwrap().unwrap(),
            first
        );
        assert_eq!(
            read_frame_from(&mut stream, 4096).await.unwrap().unwrap(),
            second
        );
        assert!(read_frame_from(&mut stream, 4096).await.unwrap().is_none());
    }
}
