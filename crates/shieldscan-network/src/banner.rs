//! Banner grabbing - bounded, protocol-aware reads from open TCP ports
//!
//! Every read is capped at [`MAX_BANNER_BYTES`] and a short timeout so a
//! chatty or stalled service cannot hold a probe slot.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Upper bound on bytes kept from any banner
pub const MAX_BANNER_BYTES: usize = 1024;

/// Banner grabber with protocol-specific probes
#[derive(Debug, Clone)]
pub struct BannerGrabber {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for BannerGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl BannerGrabber {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1500),
            read_timeout: Duration::from_millis(1500),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Connect and grab a banner using the probe appropriate for the port
    pub async fn grab(&self, target: IpAddr, port: u16) -> Option<BannerResult> {
        let addr = SocketAddr::new(target, port);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "banner connect failed");
                return None;
            }
            Err(_) => {
                trace!(%addr, "banner connect timed out");
                return None;
            }
        };
        self.grab_from_stream(stream, port).await
    }

    /// Grab a banner from a connection the caller already opened
    pub async fn grab_from_stream(&self, mut stream: TcpStream, port: u16) -> Option<BannerResult> {
        let probe = ProbeType::for_port(port);

        if let Some(payload) = probe.payload() {
            if stream.write_all(payload).await.is_err() {
                return None;
            }
        }

        let mut buffer = vec![0u8; MAX_BANNER_BYTES];
        let n = match timeout(self.read_timeout, stream.read(&mut buffer)).await {
            Ok(Ok(n)) if n > 0 => n,
            _ => return None,
        };
        buffer.truncate(n);

        let text = String::from_utf8_lossy(&buffer)
            .replace('\0', "")
            .trim()
            .to_string();

        Some(BannerResult {
            raw: buffer,
            text,
            probe_used: probe,
        })
    }
}

/// Types of probes available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeType {
    /// No probe - the service greets first (SSH, FTP, SMTP, MySQL...)
    Null,
    /// HTTP HEAD request
    Http,
    /// Redis inline PING
    Redis,
    /// Memcached `version`
    Memcached,
    /// Bare CRLF to prompt a response
    Generic,
}

impl ProbeType {
    /// Determine the best probe for a given port
    pub fn for_port(port: u16) -> Self {
        match port {
            21 | 22 | 23 | 25 | 110 | 143 | 465 | 587 | 993 | 995 | 3306 | 5900 => ProbeType::Null,
            80 | 81 | 3000 | 5000 | 8000 | 8008 | 8080 | 8081 | 8088 | 8888 | 9200 => ProbeType::Http,
            6379 => ProbeType::Redis,
            11211 => ProbeType::Memcached,
            _ => ProbeType::Generic,
        }
    }

    fn payload(&self) -> Option<&'static [u8]> {
        match self {
            ProbeType::Null => None,
            ProbeType::Http => Some(b"HEAD / HTTP/1.0\r\nUser-Agent: ShieldScan/0.1\r\n\r\n"),
            ProbeType::Redis => Some(b"PING\r\n"),
            ProbeType::Memcached => Some(b"version\r\n"),
            ProbeType::Generic => Some(b"\r\n"),
        }
    }
}

/// Result of a banner grab attempt
#[derive(Debug, Clone)]
pub struct BannerResult {
    /// Raw bytes received (at most `MAX_BANNER_BYTES`)
    pub raw: Vec<u8>,
    /// Decoded text (lossy UTF-8)
    pub text: String,
    pub probe_used: ProbeType,
}

impl BannerResult {
    /// Case-insensitive substring check
    pub fn contains(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(&needle.to_lowercase())
    }

    pub fn first_line(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }

    /// Redis answered PING without demanding AUTH
    pub fn is_open_redis(&self) -> bool {
        self.text.starts_with("+PONG")
    }
}
