//! ShieldScan Network - Port scanning, banner grabbing, service detection
//!
//! This crate provides the TCP-level probing used by the engine:
//! - Port scanning (chunked TCP connect scan, cancellable between chunks)
//! - Banner grabbing (protocol-aware, bounded reads)
//! - Service detection (banner patterns with a port-number fallback)
//! - The `ports` probe module

pub mod banner;
pub mod port_scan;
pub mod ports;
pub mod service_detect;

pub use banner::{BannerGrabber, BannerResult, ProbeType};
pub use port_scan::{PortResult, PortScanConfig, PortScanner, PortState};
pub use ports::{OpenPort, PortObservation, PortScanModule};
pub use service_detect::{ServiceDetector, ServiceInfo};
