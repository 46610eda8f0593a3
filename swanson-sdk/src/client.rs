//! Connection management for Twitch IRC.
//!
//! [`Connection`] owns the transport for one chat session. It dials the
//! server (TLS by default) with a per-attempt timeout, retries with linear
//! backoff, writes the registration frames and exposes line-level read and
//! write primitives. Nothing outside this module ever holds the socket.
//!
//! ## Registration
//!
//! Twitch does not acknowledge `JOIN` synchronously. [`Connection::authenticate_and_join`]
//! writes `PASS`, `NICK`, `CAP REQ` and `JOIN` back to back and returns; a bad
//! token only shows up later as a `NOTICE` followed by the server closing the
//! connection.
//!
//! ## Reconnection
//!
//! [`Connection::reconnect_with_backoff`] is a bounded loop: attempt `i`
//! (zero based) waits `i * base_interval` before dialing. Reconnecting after a
//! read failure is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::irc::{COMMANDS_CAPABILITY, Frame};

/// Where and how to dial.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server host name, also used for TLS server name verification.
    pub host: String,
    pub port: u16,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed local servers).
    pub tls_insecure: bool,
    /// Upper bound on one dial attempt, TLS handshake included.
    pub dial_timeout: Duration,
}

impl ConnectConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".to_string(),
            port: 6697,
            tls: true,
            tls_insecure: false,
            dial_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("TCP connect to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
    #[error("invalid TLS server name {0:?}")]
    ServerName(String),
    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not connected")]
    NotConnected,
    #[error("connection closed by server")]
    Closed,
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Joined,
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// registered yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// In-process stream, for tests and embedding.
    Memory(tokio::io::DuplexStream),
}

type LineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

impl EstablishedConnection {
    fn into_split(self) -> (LineReader, FrameWriter) {
        match self {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                (BufReader::new(Box::new(reader)), Box::new(writer))
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                (BufReader::new(Box::new(reader)), Box::new(writer))
            }
            EstablishedConnection::Memory(duplex) => {
                let (reader, writer) = tokio::io::split(duplex);
                (BufReader::new(Box::new(reader)), Box::new(writer))
            }
        }
    }
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// No timeout is applied here; [`Connection::connect`] bounds the whole call.
pub async fn establish_connection(
    config: &ConnectConfig,
) -> Result<EstablishedConnection, ConnectionError> {
    let addr = config.server_addr();
    let mode = if config.tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {addr}...");
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|source| ConnectionError::Dial {
            addr: addr.clone(),
            source,
        })?;
    tracing::debug!("TCP connected to {addr} ({mode})");

    if !config.tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let tls_config = if config.tls_insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        tracing::debug!("TLS: verifying server certificate...");
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let dns_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|_| ConnectionError::ServerName(config.host.clone()))?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|source| ConnectionError::Tls {
            addr: addr.clone(),
            source,
        })?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

fn install_crypto_provider() {
    // ring is preferred when both are enabled; aws-lc-rs is the default.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

/// The transport for one chat session.
///
/// Reads and writes are guarded separately: the read loop is the only reader,
/// while any number of tasks may write frames concurrently.
pub struct Connection {
    config: ConnectConfig,
    state: Mutex<ConnectionState>,
    reader: tokio::sync::Mutex<Option<LineReader>>,
    writer: tokio::sync::Mutex<Option<FrameWriter>>,
}

impl Connection {
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// One dial attempt bounded by the configured timeout. Does not retry.
    pub async fn connect(&self) -> bool {
        let addr = self.config.server_addr();
        tracing::info!(%addr, "Attempting to connect");
        self.set_state(ConnectionState::Connecting);

        let result = tokio::time::timeout(self.config.dial_timeout, establish_connection(&self.config))
            .await
            .unwrap_or_else(|_| {
                Err(ConnectionError::Timeout {
                    addr: addr.clone(),
                    timeout: self.config.dial_timeout,
                })
            });

        match result {
            Ok(conn) => {
                self.attach(conn).await;
                tracing::info!(%addr, "Connected");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connection failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Dial up to `max_attempts` times, sleeping `attempt * base_interval`
    /// before each attempt. Returns false once every attempt has failed.
    pub async fn reconnect_with_backoff(&self, max_attempts: u32, base_interval: Duration) -> bool {
        for attempt in 0..max_attempts {
            let delay = base_interval * attempt;
            if !delay.is_zero() {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying connection");
                tokio::time::sleep(delay).await;
            }
            if self.connect().await {
                return true;
            }
        }
        tracing::error!(
            attempts = max_attempts,
            addr = %self.config.server_addr(),
            "Failed to connect, giving up"
        );
        false
    }

    /// Adopt an already established stream, replacing any current one.
    pub async fn attach(&self, conn: EstablishedConnection) {
        let (reader, writer) = conn.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.set_state(ConnectionState::Connected);
    }

    /// Write PASS, NICK, CAP REQ and JOIN. Does not wait for the server to
    /// acknowledge anything.
    pub async fn authenticate_and_join(
        &self,
        token: &str,
        nick: &str,
        channel: &str,
    ) -> Result<(), ConnectionError> {
        tracing::info!(%channel, %nick, "Joining");
        let frames = [
            Frame::Pass(token.to_string()),
            Frame::Nick(nick.to_string()),
            Frame::CapReq(COMMANDS_CAPABILITY.to_string()),
            Frame::Join(channel.to_string()),
        ];
        for frame in &frames {
            self.write_frame(frame).await?;
        }
        self.set_state(ConnectionState::Joined);
        tracing::info!("Joined #{channel} as {nick}");
        Ok(())
    }

    /// Read one line, without its line terminator. Blocks until the server
    /// sends something; there is no read timeout.
    ///
    /// Invalid UTF-8 is replaced, not rejected.
    pub async fn read_line(&self) -> Result<String, ConnectionError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(ConnectionError::Read)?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn write_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        writer
            .write_all(frame.to_wire().as_bytes())
            .await
            .map_err(ConnectionError::Write)?;
        writer.flush().await.map_err(ConnectionError::Write)?;
        tracing::trace!(verb = frame.verb(), "Frame written");
        Ok(())
    }

    /// Close the transport. Safe to call repeatedly.
    ///
    /// The write half is shut down right away. The read half is released
    /// only if no read is in flight; otherwise it goes when the reader
    /// observes the close or the next `disconnect`.
    pub async fn disconnect(&self) {
        let writer = self.writer.lock().await.take();
        let had_transport = writer.is_some();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "Shutdown of write half failed");
            }
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        self.set_state(ConnectionState::Disconnected);
        if had_transport {
            tracing::info!(addr = %self.config.server_addr(), "Closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_twitch_tls() {
        let config = ConnectConfig::default();
        assert_eq!(config.server_addr(), "irc.chat.twitch.tv:6697");
        assert!(config.tls);
        assert!(!config.tls_insecure);
        assert_eq!(config.dial_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fresh_connection_is_disconnected() {
        let conn = Connection::new(ConnectConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.read_line().await, Err(ConnectionError::NotConnected)));
        assert!(matches!(
            conn.write_frame(&Frame::Pong).await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn memory_stream_reads_lines_without_terminators() {
        use tokio::io::AsyncWriteExt;

        let (client, mut server) = tokio::io::duplex(1024);
        let conn = Connection::new(ConnectConfig::default());
        conn.attach(EstablishedConnection::Memory(client)).await;
        assert_eq!(conn.state(), ConnectionState::Connected);

        server.write_all(b"PING :tmi.twitch.tv\r\nsecond\n").await.unwrap();
        assert_eq!(conn.read_line().await.unwrap(), "PING :tmi.twitch.tv");
        assert_eq!(conn.read_line().await.unwrap(), "second");

        drop(server);
        assert!(matches!(conn.read_line().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn disconnect_twice_is_harmless() {
        let (client, _server) = tokio::io::duplex(64);
        let conn = Connection::new(ConnectConfig::default());
        conn.attach(EstablishedConnection::Memory(client)).await;

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.write_frame(&Frame::Pong).await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn backoff_connects_once_the_server_comes_up() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        // Nothing listens for the first attempt; the second one waits 50ms.
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            listener.accept().await.unwrap()
        });

        let conn = Connection::new(ConnectConfig {
            host: "127.0.0.1".to_string(),
            port,
            tls: false,
            tls_insecure: false,
            dial_timeout: Duration::from_millis(500),
        });
        let started = tokio::time::Instant::now();
        assert!(conn.reconnect_with_backoff(5, Duration::from_millis(50)).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(conn.state(), ConnectionState::Connected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_handshake_hits_the_dial_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept the TCP connection and never answer the ClientHello.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let conn = Connection::new(ConnectConfig {
            host: "127.0.0.1".to_string(),
            port,
            tls: true,
            tls_insecure: true,
            dial_timeout: Duration::from_millis(100),
        });
        let started = tokio::time::Instant::now();
        assert!(!conn.connect().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.abort();
    }
}
