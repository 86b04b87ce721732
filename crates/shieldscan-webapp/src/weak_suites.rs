//! Legacy cipher suite acceptance
//!
//! rustls cannot offer broken suites, so a TLS 1.2 ClientHello listing only
//! those suites is written by hand. A ServerHello choosing one of them means
//! the server still accepts it; an alert or a closed connection means it
//! does not.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

const RECORD_HANDSHAKE: u8 = 0x16;
const RECORD_ALERT: u8 = 0x15;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const MAX_REPLY_BYTES: usize = 4096;

/// RC4, DES, 3DES, export and NULL suites
pub const WEAK_SUITES: &[(u16, &str)] = &[
    (0xC011, "TLS_ECDHE_RSA_WITH_RC4_128_SHA"),
    (0xC007, "TLS_ECDHE_ECDSA_WITH_RC4_128_SHA"),
    (0x0005, "TLS_RSA_WITH_RC4_128_SHA"),
    (0x0004, "TLS_RSA_WITH_RC4_128_MD5"),
    (0xC012, "TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0xC008, "TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA"),
    (0x0016, "TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0x000A, "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0x0009, "TLS_RSA_WITH_DES_CBC_SHA"),
    (0x0008, "TLS_RSA_EXPORT_WITH_DES40_CBC_SHA"),
    (0x0003, "TLS_RSA_EXPORT_WITH_RC4_40_MD5"),
    (0x003B, "TLS_RSA_WITH_NULL_SHA256"),
    (0x0002, "TLS_RSA_WITH_NULL_SHA"),
    (0x0001, "TLS_RSA_WITH_NULL_MD5"),
];

pub fn suite_name(code: u16) -> Option<&'static str> {
    WEAK_SUITES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Whether the server agreed to a legacy suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "suite", rename_all = "snake_case")]
pub enum WeakSuiteVerdict {
    Rejected,
    Accepted(String),
    /// No usable answer: connect failure, timeout or a non-TLS reply
    NotEvaluated,
}

/// ClientHello offering only [`WEAK_SUITES`]. SNI is sent for host names.
pub fn client_hello(host: Option<&str>) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u16(0x0303);
    body.put_slice(Uuid::new_v4().as_bytes());
    body.put_slice(Uuid::new_v4().as_bytes());
    // Empty session id
    body.put_u8(0);

    body.put_u16((WEAK_SUITES.len() * 2) as u16);
    for (code, _) in WEAK_SUITES {
        body.put_u16(*code);
    }
    // Null compression only
    body.put_u8(1);
    body.put_u8(0);

    let mut extensions = BytesMut::new();
    if let Some(host) = host {
        let name = host.as_bytes();
        put_extension(&mut extensions, 0x0000, |ext| {
            ext.put_u16((name.len() + 3) as u16);
            ext.put_u8(0);
            ext.put_u16(name.len() as u16);
            ext.put_slice(name);
        });
    }
    // x25519, secp256r1, secp384r1
    put_extension(&mut extensions, 0x000a, |ext| {
        ext.put_u16(6);
        ext.put_u16(0x001d);
        ext.put_u16(0x0017);
        ext.put_u16(0x0018);
    });
    // Uncompressed points
    put_extension(&mut extensions, 0x000b, |ext| {
        ext.put_u8(1);
        ext.put_u8(0);
    });
    let schemes: [u16; 6] = [0x0403, 0x0503, 0x0603, 0x0401, 0x0501, 0x0601];
    put_extension(&mut extensions, 0x000d, |ext| {
        ext.put_u16((schemes.len() * 2) as u16);
        for scheme in schemes {
            ext.put_u16(scheme);
        }
    });
    // Empty renegotiation_info
    put_extension(&mut extensions, 0xff01, |ext| ext.put_u8(0));

    body.put_u16(extensions.len() as u16);
    body.put_slice(&extensions);

    let mut record = BytesMut::with_capacity(body.len() + 9);
    record.put_u8(RECORD_HANDSHAKE);
    record.put_u16(0x0301);
    record.put_u16((body.len() + 4) as u16);
    record.put_u8(HANDSHAKE_CLIENT_HELLO);
    // 24-bit handshake length
    record.put_u8(0);
    record.put_u16(body.len() as u16);
    record.put_slice(&body);
    record.to_vec()
}

fn put_extension(buf: &mut BytesMut, kind: u16, write: impl FnOnce(&mut BytesMut)) {
    let mut data = BytesMut::new();
    write(&mut data);
    buf.put_u16(kind);
    buf.put_u16(data.len() as u16);
    buf.put_slice(&data);
}

/// Cipher suite picked by a ServerHello at the start of `reply`
pub fn chosen_suite(reply: &[u8]) -> Option<u16> {
    if reply.first() != Some(&RECORD_HANDSHAKE) || reply.get(5) != Some(&HANDSHAKE_SERVER_HELLO) {
        return None;
    }
    // Record header, handshake header, version, random
    let session_id_at = 5 + 4 + 2 + 32;
    let session_id_len = *reply.get(session_id_at)? as usize;
    let at = session_id_at + 1 + session_id_len;
    Some(u16::from_be_bytes([*reply.get(at)?, *reply.get(at + 1)?]))
}

fn verdict_for(reply: &[u8]) -> Option<WeakSuiteVerdict> {
    match *reply.first()? {
        RECORD_ALERT => Some(WeakSuiteVerdict::Rejected),
        RECORD_HANDSHAKE => {
            let code = chosen_suite(reply)?;
            Some(match suite_name(code) {
                Some(name) => WeakSuiteVerdict::Accepted(name.to_string()),
                // A suite that was never offered is not an answer to this hello
                None => WeakSuiteVerdict::NotEvaluated,
            })
        }
        _ => Some(WeakSuiteVerdict::NotEvaluated),
    }
}

/// Offer only legacy suites to `addr` and report what the server does
pub async fn check_weak_suites(
    addr: SocketAddr,
    host: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> WeakSuiteVerdict {
    let mut stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "legacy suite connect failed");
            return WeakSuiteVerdict::NotEvaluated;
        }
        Err(_) => return WeakSuiteVerdict::NotEvaluated,
    };

    let exchange = async {
        stream.write_all(&client_hello(host)).await?;
        let mut reply = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(reply);
            }
            reply.extend_from_slice(&buf[..n]);
            if verdict_for(&reply).is_some_and(|v| v != WeakSuiteVerdict::NotEvaluated)
                || reply.len() >= MAX_REPLY_BYTES
            {
                return Ok(reply);
            }
        }
    };

    let verdict = match timeout(read_timeout, exchange).await {
        Err(_) => WeakSuiteVerdict::NotEvaluated,
        // Dropping the connection is how many servers refuse a hello
        Ok(Err(_)) => WeakSuiteVerdict::Rejected,
        Ok(Ok(reply)) if reply.is_empty() => WeakSuiteVerdict::Rejected,
        Ok(Ok(reply)) => verdict_for(&reply).unwrap_or(WeakSuiteVerdict::NotEvaluated),
    };
    debug!(%addr, ?verdict, "legacy suite check");
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn server_hello(suite: u16) -> Vec<u8> {
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[7u8; 32]);
        body.push(0);
        body.extend_from_slice(&suite.to_be_bytes());
        body.push(0);

        let mut reply = vec![RECORD_HANDSHAKE, 0x03, 0x03];
        reply.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
        reply.push(HANDSHAKE_SERVER_HELLO);
        reply.push(0);
        reply.extend_from_slice(&(body.len() as u16).to_be_bytes());
        reply.extend_from_slice(&body);
        reply
    }

    /// Answers every connection with `reply` after reading the hello
    async fn answering_server(reply: Option<Vec<u8>>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let reply = reply.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    if let Some(bytes) = reply {
                        let _ = sock.write_all(&bytes).await;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                });
            }
        });
        addr
    }

    #[test]
    fn test_client_hello_layout() {
        let hello = client_hello(Some("shop.example.com"));
        assert_eq!(hello[0], RECORD_HANDSHAKE);
        let record_len = u16::from_be_bytes([hello[3], hello[4]]) as usize;
        assert_eq!(record_len, hello.len() - 5);
        assert_eq!(hello[5], HANDSHAKE_CLIENT_HELLO);
        let hello_len = u16::from_be_bytes([hello[7], hello[8]]) as usize;
        assert_eq!(hello_len, hello.len() - 9);

        // Cipher list follows version, random and an empty session id
        let suites_at = 9 + 2 + 32 + 1;
        let suites_len = u16::from_be_bytes([hello[suites_at], hello[suites_at + 1]]) as usize;
        assert_eq!(suites_len, WEAK_SUITES.len() * 2);
        assert_eq!(&hello[suites_at + 2..suites_at + 4], &0xC011u16.to_be_bytes());

        let with_sni = hello.windows(16).any(|w| w == b"shop.example.com");
        assert!(with_sni);
        let without = client_hello(None);
        assert!(without.len() < hello.len());
    }

    #[test]
    fn test_chosen_suite() {
        assert_eq!(chosen_suite(&server_hello(0x000A)), Some(0x000A));
        assert_eq!(chosen_suite(&[RECORD_ALERT, 3, 3, 0, 2, 2, 40]), None);
        assert_eq!(chosen_suite(&server_hello(0x000A)[..20]), None);
        assert_eq!(verdict_for(&server_hello(0x1301)), Some(WeakSuiteVerdict::NotEvaluated));
        assert_eq!(verdict_for(b"HTTP/1.1 400 Bad Request\r\n"), Some(WeakSuiteVerdict::NotEvaluated));
    }

    #[tokio::test]
    async fn test_server_choosing_3des_is_accepted() {
        let addr = answering_server(Some(server_hello(0x000A))).await;
        let verdict = check_weak_suites(addr, None, Duration::from_secs(1), Duration::from_secs(2)).await;
        assert_eq!(
            verdict,
            WeakSuiteVerdict::Accepted("TLS_RSA_WITH_3DES_EDE_CBC_SHA".into())
        );
    }

    #[tokio::test]
    async fn test_alert_or_close_is_rejected() {
        let alert = vec![RECORD_ALERT, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];
        let addr = answering_server(Some(alert)).await;
        let verdict = check_weak_suites(addr, None, Duration::from_secs(1), Duration::from_secs(2)).await;
        assert_eq!(verdict, WeakSuiteVerdict::Rejected);

        let addr = answering_server(None).await;
        let verdict = check_weak_suites(addr, None, Duration::from_secs(1), Duration::from_secs(2)).await;
        assert_eq!(verdict, WeakSuiteVerdict::Rejected);
    }

    #[tokio::test]
    async fn test_silent_or_closed_port_is_not_evaluated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        let verdict =
            check_weak_suites(silent, None, Duration::from_secs(1), Duration::from_millis(200)).await;
        assert_eq!(verdict, WeakSuiteVerdict::NotEvaluated);

        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let verdict =
            check_weak_suites(closed, None, Duration::from_secs(1), Duration::from_millis(200)).await;
        assert_eq!(verdict, WeakSuiteVerdict::NotEvaluated);
    }
}
