//! ShieldScan WebApp - Probe modules that speak TLS and HTTP
//!
//! This crate provides:
//! - The `tls` module: protocol, cipher, certificate chain and HSTS checks,
//!   plus a hand-written ClientHello for legacy cipher suites
//! - The `headers` module: HTTP security header checks
//! - A small reqwest-based HTTP client shared by both

pub mod client;
pub mod headers;
pub mod tls;
pub mod weak_suites;

pub use client::{ClientError, HttpClient, HttpResponse};
pub use headers::{HeaderObservation, HeadersModule};
pub use tls::{CertificateFacts, ChainStatus, KeyAlgorithm, TlsModule, TlsObservation, TlsProtocol};
pub use weak_suites::WeakSuiteVerdict;
