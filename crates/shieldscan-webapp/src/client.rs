//! HTTP client used by the web-facing probe modules

use reqwest::{header, Client, StatusCode};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

pub const USER_AGENT: &str = "ShieldScan/0.1";

/// Bytes of response body kept; header checks never need more
const MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased; repeated headers are joined with ", "
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Final URL (after redirects)
    pub final_url: String,
    pub response_time_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Get header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Thin reqwest wrapper with scanner defaults.
///
/// Certificate problems are ignored here; the `tls` module owns those.
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        Self::build(timeout, None)
    }

    /// Client that sends requests for `host` to `ip` instead of resolving
    /// the name again
    pub fn pinned(timeout: Duration, host: &str, ip: IpAddr) -> Result<Self, ClientError> {
        Self::build(timeout, Some((host, ip)))
    }

    fn build(timeout: Duration, pin: Option<(&str, IpAddr)>) -> Result<Self, ClientError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .danger_accept_invalid_certs(true);

        if let Some((host, ip)) = pin {
            // Port 0 keeps the port from the URL
            builder = builder.resolve(host, SocketAddr::new(ip, 0));
        }

        Ok(Self {
            client: builder.build()?,
            timeout,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(reqwest::Method::GET, url).await
    }

    pub async fn head(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(reqwest::Method::HEAD, url).await
    }

    async fn request(&self, method: reqwest::Method, url: &str) -> Result<HttpResponse, ClientError> {
        debug!(%method, url, "http request");
        let start = Instant::now();

        let response = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "text/html,*/*")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(self.timeout)
                } else if e.is_connect() {
                    ClientError::ConnectionRefused
                } else {
                    ClientError::Request(e)
                }
            })?;

        let response_time_ms = start.elapsed().as_millis() as u64;
        let status: StatusCode = response.status();
        let final_url = response.url().to_string();

        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_BYTES {
            let mut cut = MAX_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
            final_url,
            response_time_ms,
        })
    }
}
