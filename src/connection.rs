//! TCP connection establishment and the authentication handshake.
//!
//! Main dials the replica, presents the shared key, and waits for an
//! `AuthOk` frame. The replica listens, validates the key under a read
//! deadline, and hands back exactly one authenticated connection per run.
//! The transport is not encrypted; the key proves identity only.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use ring::constant_time;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use crate::message::{Message, MessageError, FRAME_TERMINATOR};

const DIAL_ATTEMPTS: u32 = 4;
const DIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const AUTH_DEADLINE: Duration = Duration::from_secs(5);
const MAX_ACCEPT_FAILURES: u32 = 5;

/// One duplex byte stream carrying framed messages.
///
/// The role (initiator or acceptor) is fixed at creation and the
/// authentication outcome is decided before any sync traffic is read.
/// Dropping the connection closes it.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Wraps an already-established stream. Useful when the caller manages
    /// the listener itself; normal runs go through [`connect`] or
    /// [`Acceptor`].
    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Writes one complete frame to the peer.
    pub async fn send(&mut self, msg: &Message) -> Result<(), WireError> {
        let frame = msg.encode().map_err(WireError::Codec)?;
        self.writer.write_all(&frame).await.map_err(WireError::Io)?;
        tracing::trace!(kind = msg.kind_name(), bytes = frame.len(), "sent frame");
        Ok(())
    }

    /// Blocks until one complete frame (through the NUL terminator) arrives
    /// and decodes it.
    pub async fn recv(&mut self) -> Result<Message, WireError> {
        let mut frame = Vec::new();
        let n = self
            .reader
            .read_until(FRAME_TERMINATOR, &mut frame)
            .await
            .map_err(WireError::Io)?;
        if n == 0 {
            return Err(WireError::Closed);
        }
        let msg = Message::decode(&frame).map_err(WireError::Codec)?;
        tracing::trace!(kind = msg.kind_name(), bytes = n, "received frame");
        Ok(msg)
    }
}

/// Produces the authenticated connection for either role.
pub async fn establish(
    addr: &str,
    key: &[u8],
    replica: bool,
) -> Result<Connection, ConnectError> {
    if replica {
        Acceptor::bind(addr).await?.accept_authenticated(key).await
    } else {
        connect(addr, key).await
    }
}

/// Dials the replica, retrying refused connections, then authenticates.
pub async fn connect(addr: &str, key: &[u8]) -> Result<Connection, ConnectError> {
    let stream = dial_with_retry(addr).await?;
    let mut conn = Connection::from_stream(stream);

    conn.send(&Message::Auth { key: key.to_vec() })
        .await
        .map_err(|e| {
            ConnectError::AuthenticationFailed(format!("failed to send auth message: {}", e))
        })?;

    match conn.recv().await {
        Ok(Message::AuthOk) => {
            tracing::info!(%addr, "connection authenticated");
            Ok(conn)
        }
        Ok(Message::AuthFail) => Err(ConnectError::AuthenticationFailed(
            "replica rejected the credential".to_string(),
        )),
        Ok(other) => Err(ConnectError::AuthenticationFailed(format!(
            "expected auth-ok, got {}",
            other.kind_name()
        ))),
        Err(e) => Err(ConnectError::AuthenticationFailed(format!(
            "failed to read auth response: {}",
            e
        ))),
    }
}

async fn dial_with_retry(addr: &str) -> Result<TcpStream, ConnectError> {
    let mut attempt = 1u32;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                if attempt == DIAL_ATTEMPTS {
                    return Err(ConnectError::ConnectionFailed(format!(
                        "connection to {} refused after {} attempts: {}",
                        addr, DIAL_ATTEMPTS, e
                    )));
                }
                tracing::info!(%addr, attempt, "connection refused, retrying in 1s");
                sleep(DIAL_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(ConnectError::ConnectionFailed(format!(
                    "failed to dial {}: {}",
                    addr, e
                )))
            }
        }
    }
}

/// Listening side of the handshake. Bound separately from the accept loop
/// so callers can bind to port 0 and read back the assigned address.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub async fn bind(addr: &str) -> Result<Self, ConnectError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ConnectError::AcceptFailed(format!("failed to listen on {}: {}", addr, e))
        })?;
        tracing::info!(%addr, "listening for an authenticated peer");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until one authenticates, then returns it.
    ///
    /// Rejected peers get a best-effort `AuthFail` and the loop keeps
    /// accepting. Five consecutive accept-level failures abort. The
    /// listener is dropped once a peer authenticates.
    pub async fn accept_authenticated(self, key: &[u8]) -> Result<Connection, ConnectError> {
        let mut failures = 0u32;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "failed to accept connection");
                    if failures >= MAX_ACCEPT_FAILURES {
                        return Err(ConnectError::AcceptFailed(format!(
                            "{} consecutive accept failures, last: {}",
                            failures, e
                        )));
                    }
                    continue;
                }
            };
            failures = 0;

            let mut conn = Connection::from_stream(stream);
            match read_valid_auth(&mut conn, key).await {
                Ok(()) => {
                    conn.send(&Message::AuthOk).await.map_err(|e| {
                        ConnectError::AuthenticationFailed(format!(
                            "failed to send auth-ok: {}",
                            e
                        ))
                    })?;
                    tracing::info!(%peer, "peer authenticated");
                    return Ok(conn);
                }
                Err(reason) => {
                    tracing::warn!(%peer, %reason, "rejected peer");
                    // Best-effort notification; the connection is being
                    // dropped either way.
                    let _ = conn.send(&Message::AuthFail).await;
                }
            }
        }
    }
}

/// Reads one frame under the auth deadline and validates the credential
/// with a constant-time comparison. Returns the rejection reason on failure.
async fn read_valid_auth(conn: &mut Connection, key: &[u8]) -> Result<(), String> {
    let msg = match timeout(AUTH_DEADLINE, conn.recv()).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => return Err(format!("failed to read auth message: {}", e)),
        Err(_) => return Err("timed out waiting for auth message".to_string()),
    };

    let presented = match msg {
        Message::Auth { key } => key,
        other => return Err(format!("expected auth, got {}", other.kind_name())),
    };

    if constant_time::verify_slices_are_equal(&presented, key).is_err() {
        return Err("invalid api key".to_string());
    }
    Ok(())
}

/// Errors from establishing or authenticating the connection.
#[derive(Debug)]
pub enum ConnectError {
    /// Dial failed, including exhausted refused-connection retries
    ConnectionFailed(String),
    /// Listener could not bind, or too many consecutive accept failures
    AcceptFailed(String),
    /// Credential mismatch, malformed auth frame, or handshake read failure
    AuthenticationFailed(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            ConnectError::AcceptFailed(e) => write!(f, "Accept failed: {}", e),
            ConnectError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors from sending or receiving a single frame.
#[derive(Debug)]
pub enum WireError {
    /// Transport-level read/write failure
    Io(io::Error),
    /// Frame failed to encode or decode
    Codec(MessageError),
    /// Peer closed the stream before a frame arrived
    Closed,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "Connection I/O error: {}", e),
            WireError::Codec(e) => write!(f, "Malformed message: {}", e),
            WireError::Closed => write!(f, "Connection closed by peer"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            WireError::Codec(e) => Some(e),
            WireError::Closed => None,
        }
    }
}
