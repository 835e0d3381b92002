//! TCP/TLS reference connection factory.
//!
//! [`TcpConnectionFactory`] opens a raw socket to the `host`/`port` carried by
//! the connection key. No protocol handshake is performed: callers speak their
//! wire protocol over the [`TcpConnection`] byte stream. When the key carries a
//! non-empty `ssl` map the stream is wrapped in TLS via `rustls`, so callers
//! read and write plaintext either way.
//!
//! Recognised key parameters:
//!
//! | name              | meaning                                      |
//! |-------------------|----------------------------------------------|
//! | `host`            | server name or address, default `localhost`  |
//! | `port`            | required                                     |
//! | `connect_timeout` | seconds, overrides the factory default       |
//! | `read_timeout`    | seconds, overrides the factory default       |
//! | `ssl`             | map; non-empty enables TLS                   |
//! | `ssl.server_name` | TLS server name, default `host`              |

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use connpool_core::ConnectionKey;

use crate::factory::{ConnectionFactory, ManagedConnection};

const DEFAULT_HOST: &str = "localhost";
const PING_TIMEOUT: Duration = Duration::from_millis(100);

// ── Transport ────────────────────────────────────────────────────────

enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

// ── TcpConnection ────────────────────────────────────────────────────

/// A pooled byte stream, plain or TLS.
pub struct TcpConnection {
    transport: Transport,
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.tcp_stream().peer_addr().ok())
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl TcpConnection {
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            transport: Transport::Plain(stream),
        }
    }

    pub fn tls(stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>) -> Self {
        Self {
            transport: Transport::Tls(Box::new(stream)),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// The socket underneath any TLS layer.
    pub fn tcp_stream(&self) -> &TcpStream {
        match &self.transport {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

impl ManagedConnection for TcpConnection {
    fn close(&mut self) {
        if let Transport::Tls(s) = &mut self.transport {
            s.conn.send_close_notify();
            let _ = s.flush();
        }
        let _ = self.tcp_stream().shutdown(Shutdown::Both);
    }

    /// Non-blocking peek: EOF means the peer hung up.
    fn is_alive(&mut self) -> bool {
        let stream = self.tcp_stream();

        let original_timeout = stream.read_timeout().ok().flatten();
        if stream.set_read_timeout(Some(PING_TIMEOUT)).is_err() {
            return false;
        }

        let mut peek_buf = [0u8; 1];
        let alive = match stream.peek(&mut peek_buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
        };

        let _ = stream.set_read_timeout(original_timeout);
        alive
    }
}

// ── TlsConfig ────────────────────────────────────────────────────────

/// Client-side TLS settings shared by every TLS connection of a factory.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Verify servers against the Mozilla root certificate store.
    pub fn with_system_roots() -> anyhow::Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .context("tls protocol versions")?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// Accept any server certificate. Tests only.
    #[cfg(test)]
    pub fn dangerous_no_verify() -> Self {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .expect("safe default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Self {
            client_config: Arc::new(config),
        }
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}


// ── TcpConnectionFactory ─────────────────────────────────────────────

/// Opens [`TcpConnection`]s to the endpoint named by a connection key.
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    /// Used for keys that request TLS; Mozilla roots when unset.
    tls_config: Option<TlsConfig>,
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TcpConnectionFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout: None,
            tls_config: None,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    pub fn with_tls(mut self, tls_config: TlsConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    fn tls_config(&self) -> anyhow::Result<TlsConfig> {
        match &self.tls_config {
            Some(tls) => Ok(tls.clone()),
            None => TlsConfig::with_system_roots(),
        }
    }
}

/// Reads a seconds value (integer or float) from the key.
fn seconds_param(key: &ConnectionKey, name: &str) -> anyhow::Result<Option<Duration>> {
    let Some(value) = key.get(name) else {
        return Ok(None);
    };
    let secs = value
        .as_float()
        .ok_or_else(|| anyhow!("{name} must be a number of seconds, got {value}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("{name} must be positive, got {secs}");
    }
    let timeout =
        Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{name} of {secs} seconds: {e}"))?;
    Ok(Some(timeout))
}

impl ConnectionFactory for TcpConnectionFactory {
    type Connection = TcpConnection;

    fn create(&self, key: &ConnectionKey) -> anyhow::Result<TcpConnection> {
        let host = key.str_param("host").unwrap_or(DEFAULT_HOST);
        let port = key
            .int_param("port")
            .ok_or_else(|| anyhow!("connection key has no integer port"))?;
        let port = u16::try_from(port).with_context(|| format!("port {port} out of range"))?;
        let connect_timeout = seconds_param(key, "connect_timeout")?.unwrap_or(self.connect_timeout);
        let read_timeout = seconds_param(key, "read_timeout")?.or(self.read_timeout);

        let addr_str = format!("{host}:{port}");
        let addr = addr_str
            .to_socket_addrs()
            .with_context(|| format!("dns resolution failed for {addr_str}"))?
            .next()
            .ok_or_else(|| anyhow!("no address found for {addr_str}"))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .with_context(|| format!("tcp connect to {addr_str}"))?;
        stream
            .set_read_timeout(read_timeout)
            .context("set read timeout")?;
        let _ = stream.set_nodelay(true);

        let ssl = key.map_param("ssl").filter(|ssl| !ssl.is_empty());

        tracing::debug!(
            host = %host,
            port = port,
            tls = ssl.is_some(),
            "established tcp connection"
        );

        let Some(ssl) = ssl else {
            return Ok(TcpConnection::plain(stream));
        };

        let server_name = ssl
            .get("server_name")
            .and_then(|v| v.as_str())
            .unwrap_or(host);
        let server_name = rustls::pki_types::ServerName::try_from(server_name)
            .with_context(|| format!("invalid tls server name '{server_name}'"))?
            .to_owned();

        let tls = self.tls_config()?;
        let session = rustls::ClientConnection::new(Arc::clone(&tls.client_config), server_name)
            .context("tls session creation")?;
        Ok(TcpConnection::tls(rustls::StreamOwned::new(session, stream)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
