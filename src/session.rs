//! Connection session state machine.
//!
//! A session owns the peer's stream from accept until close and walks
//! through `Open -> Receiving -> (Processing -> Responding)* -> Closed`.
//! Each read is decoded, split into record segments and answered in order.
//! Malformed records are logged and skipped; the session keeps receiving.

use crate::protocol::{Message, Parser, Response};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, nothing exchanged yet.
    Open,
    /// Waiting for the next chunk from the peer.
    Receiving,
    /// Decoding and parsing a received chunk.
    Processing,
    /// Writing responses back to the peer.
    Responding,
    /// Terminal; the stream has been shut down.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent the sentinel.
    Sentinel,
    /// Zero-length read.
    PeerClosed,
    /// Read returned an error.
    ReadFailed,
    /// Write returned an error.
    WriteFailed,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub records: u64,
    pub malformed: u64,
}

/// Outcome reported when a session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: CloseReason,
    pub stats: SessionStats,
}

/// A single peer connection.
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    state: SessionState,
    recv_buf: BytesMut,
    response: BytesMut,
    stats: SessionStats,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new session in the open state.
    pub fn new(stream: S, peer: SocketAddr, recv_buffer_size: usize) -> Self {
        Self {
            stream,
            peer,
            state: SessionState::Open,
            recv_buf: BytesMut::zeroed(recv_buffer_size),
            response: BytesMut::with_capacity(recv_buffer_size),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Drive the session until it closes.
    pub async fn run(&mut self) -> SessionSummary {
        let reason = loop {
            if let Some(reason) = self.step().await {
                break reason;
            }
        };

        self.close().await;

        SessionSummary {
            reason,
            stats: self.stats,
        }
    }

    /// Shut the stream down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Shutdown failed, peer already gone");
        }
        self.state = SessionState::Closed;
    }

    /// One receive/process/respond cycle. Returns the close reason once the
    /// session should end.
    async fn step(&mut self) -> Option<CloseReason> {
        self.state = SessionState::Receiving;

        let n = match self.stream.read(&mut self.recv_buf[..]).await {
            Ok(0) => {
                trace!(peer = %self.peer, "Connection closed by peer");
                return Some(CloseReason::PeerClosed);
            }
            Ok(n) => n,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Read failed");
                return Some(CloseReason::ReadFailed);
            }
        };

        self.state = SessionState::Processing;
        self.response.clear();
        let disconnect = process_chunk(
            &self.recv_buf[..n],
            &mut self.response,
            &mut self.stats,
            self.peer,
        );

        if !self.response.is_empty() {
            self.state = SessionState::Responding;
            if let Err(e) = write_response(&mut self.stream, &self.response).await {
                debug!(peer = %self.peer, error = %e, "Write failed");
                return Some(CloseReason::WriteFailed);
            }
        }

        if disconnect {
            trace!(peer = %self.peer, "Disconnect requested by peer");
            return Some(CloseReason::Sentinel);
        }

        None
    }
}

/// Write a full response, retrying partial writes until done or failed.
async fn write_response<W>(stream: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    stream.flush().await
}

/// Parse every segment of a received chunk, appending echo lines to
/// `response`. Returns true when the sentinel was seen; segments after it
/// are dropped.
fn process_chunk(
    chunk: &[u8],
    response: &mut BytesMut,
    stats: &mut SessionStats,
    peer: SocketAddr,
) -> bool {
    let text = match Parser::decode(chunk) {
        Ok(text) => text,
        Err(e) => {
            stats.malformed += 1;
            warn!(peer = %peer, error = %e, "Malformed message");
            return false;
        }
    };

    for segment in Parser::segments(text) {
        let line = match Parser::parse(segment) {
            Ok(Message::Disconnect) => return true,
            Ok(Message::Record(record)) => Response::record(&record),
            Err(e) => Err(e),
        };

        match line {
            Ok(line) => {
                trace!(peer = %peer, line = segment, "Echoing record");
                response.extend_from_slice(&line);
                stats.records += 1;
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(peer = %peer, error = %e, line = segment, "Malformed message");
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:50001".parse().unwrap()
    }

    #[tokio::test]
    async fn test_echo_then_peer_closed() {
        let stream = Builder::new()
            .read(b"1.5,2.5,3.5,4.25,7")
            .write(b"1.5,2.5,3.5,4.25,7\r\n")
            .build();

        let mut session = Session::new(stream, peer(), 1024);
        assert_eq!(session.state(), SessionState::Open);

        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.stats.records, 1);
        assert_eq!(summary.stats.malformed, 0);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_sentinel_sends_nothing() {
        let stream = Builder::new().read(b"Disconnect").build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::Sentinel);
        assert_eq!(summary.stats, SessionStats::default());
    }

    #[tokio::test]
    async fn test_malformed_is_skipped() {
        let stream = Builder::new()
            .read(b"a,b,c,not-a-number,1")
            .read(b"a,b,c,1,2")
            .write(b"a,b,c,1.0,2\r\n")
            .read(b"Disconnect")
            .build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::Sentinel);
        assert_eq!(summary.stats.records, 1);
        assert_eq!(summary.stats.malformed, 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_skipped() {
        let stream = Builder::new().read(&[0xff, 0x2c, 0xfe]).build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.stats.malformed, 1);
    }

    #[tokio::test]
    async fn test_multiple_records_in_one_chunk() {
        let stream = Builder::new()
            .read(b"1,2,3,4,5\r\nbad\n6,7,8,9.5,10\nDisconnect\n11,12,13,14,15\n")
            .write(b"1,2,3,4.0,5\r\n6,7,8,9.5,10\r\n")
            .build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::Sentinel);
        assert_eq!(summary.stats.records, 2);
        assert_eq!(summary.stats.malformed, 1);
    }

    #[tokio::test]
    async fn test_small_buffer_reads_in_pieces() {
        let stream = Builder::new().read(b"Disconnect").build();

        let mut session = Session::new(stream, peer(), 4);
        let summary = session.run().await;
        // "Disc", "onne", "ct" are each malformed; records are not reassembled
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.stats.malformed, 3);
    }

    #[tokio::test]
    async fn test_write_failure_closes() {
        let stream = Builder::new()
            .read(b"1,2,3,4,5")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::WriteFailed);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_read_failure_closes() {
        let stream = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut session = Session::new(stream, peer(), 1024);
        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::ReadFailed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let stream = Builder::new().build();

        let mut session = Session::new(stream, peer(), 1024);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_process_chunk_stops_at_sentinel() {
        let mut response = BytesMut::new();
        let mut stats = SessionStats::default();

        let disconnect = process_chunk(
            b"1,2,3,4,5\nDisconnect\n6,7,8,9,10",
            &mut response,
            &mut stats,
            peer(),
        );

        assert!(disconnect);
        assert_eq!(&response[..], b"1,2,3,4.0,5\r\n");
        assert_eq!(stats.records, 1);
    }
}
