//! Port scanning - chunked TCP connect scan with optional banner grabbing

use crate::banner::{BannerGrabber, BannerResult};
use shieldscan_core::{CancelSignal, ModuleError};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// State of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Port is open and accepting connections
    Open,
    /// Port is closed (RST received)
    Closed,
    /// No response, possibly firewalled
    Filtered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        }
    }
}

/// Result of scanning a single port
#[derive(Debug, Clone)]
pub struct PortResult {
    pub ip: IpAddr,
    pub port: u16,
    pub state: PortState,
    /// Round-trip time of the connect
    pub rtt: Option<Duration>,
    pub banner: Option<BannerResult>,
}

impl PortResult {
    fn new(ip: IpAddr, port: u16, state: PortState) -> Self {
        Self {
            ip,
            port,
            state,
            rtt: None,
            banner: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Port scanner configuration
#[derive(Debug, Clone)]
pub struct PortScanConfig {
    /// Timeout per connect attempt
    pub connect_timeout: Duration,
    /// Ports probed at once; also the chunk size between cancellation checks
    pub concurrency: usize,
    /// Grab banners from open ports
    pub grab_banners: bool,
    pub banner_timeout: Duration,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1500),
            concurrency: 100,
            grab_banners: true,
            banner_timeout: Duration::from_millis(1500),
        }
    }
}

/// Port lists
pub mod ports {
    use shieldscan_core::ScanDepth;
    use std::collections::BTreeSet;

    /// Top 100 most common TCP ports
    pub const TOP_100: &[u16] = &[
        7, 9, 13, 21, 22, 23, 25, 26, 37, 53, 79, 80, 81, 88, 106, 110, 111, 113, 119, 135, 139,
        143, 144, 179, 199, 389, 427, 443, 444, 445, 465, 513, 514, 515, 543, 544, 548, 554, 587,
        631, 646, 873, 990, 993, 995, 1025, 1026, 1027, 1028, 1029, 1110, 1433, 1720, 1723, 1755,
        1900, 2000, 2001, 2049, 2121, 2717, 3000, 3128, 3306, 3389, 3986, 4899, 5000, 5009, 5051,
        5060, 5101, 5190, 5357, 5432, 5631, 5666, 5800, 5900, 6000, 6001, 6646, 7070, 8000, 8008,
        8009, 8080, 8081, 8443, 8888, 9100, 9999, 10000, 32768, 49152, 49153, 49154, 49155, 49156,
        49157,
    ];

    /// Service ports above 1024 commonly exposed by databases, caches,
    /// orchestration and admin consoles
    pub const COMMON_HIGH: &[u16] = &[
        1080, 1194, 1434, 1521, 1883, 2082, 2083, 2181, 2222, 2375, 2376, 2379, 2380, 3268, 3269,
        3690, 4369, 4443, 4444, 4567, 4848, 5001, 5433, 5601, 5672, 5900, 5901, 5984, 5985,
        5986, 6379, 6443, 6667, 7001, 7002, 7474, 7547, 8083, 8086, 8088, 8161, 8500, 8834,
        9000, 9042, 9090, 9092, 9200, 9300, 9418, 9443, 10250, 11211, 15672, 27017, 27018, 50000,
        50070,
    ];

    /// Unauthenticated-by-default services, probed at every depth
    pub const ALWAYS_PROBED: &[u16] = &[
        21, 23, 135, 139, 445, 1433, 2375, 3306, 3389, 5432, 5900, 6379, 9200, 11211, 27017,
    ];

    /// Port set probed at a given scan depth, sorted and de-duplicated
    pub fn for_depth(depth: ScanDepth) -> Vec<u16> {
        let mut set: BTreeSet<u16> = TOP_100.iter().copied().collect();
        set.extend(ALWAYS_PROBED);
        match depth {
            ScanDepth::Quick => {}
            ScanDepth::Standard => {
                set.extend(1..=1024);
                set.extend(COMMON_HIGH);
            }
            ScanDepth::Deep => {
                set.extend(1..=10000);
                set.extend(COMMON_HIGH);
            }
        }
        set.into_iter().collect()
    }
}

/// Port scanner engine
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: PortScanConfig,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PortScanConfig) -> Self {
        Self { config }
    }

    /// Scan a single port on a target
    pub async fn scan_port(&self, target: IpAddr, port: u16) -> PortResult {
        let addr = SocketAddr::new(target, port);
        let start = Instant::now();

        match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let mut result = PortResult::new(target, port, PortState::Open);
                result.rtt = Some(start.elapsed());
                debug!(ip = %target, port, "port open");

                if self.config.grab_banners {
                    let grabber = BannerGrabber::new().with_read_timeout(self.config.banner_timeout);
                    result.banner = grabber.grab_from_stream(stream, port).await;
                }
                result
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                trace!(ip = %target, port, "port closed");
                let mut result = PortResult::new(target, port, PortState::Closed);
                result.rtt = Some(start.elapsed());
                result
            }
            Ok(Err(e)) => {
                trace!(ip = %target, port, error = %e, "port filtered");
                PortResult::new(target, port, PortState::Filtered)
            }
            Err(_) => PortResult::new(target, port, PortState::Filtered),
        }
    }

    /// Scan ports on a target in chunks of `concurrency`, checking the
    /// cancellation signal between chunks.
    pub async fn scan_ports(
        &self,
        target: IpAddr,
        ports: &[u16],
        cancel: &CancelSignal,
    ) -> Result<Vec<PortResult>, ModuleError> {
        let chunk_size = self.config.concurrency.max(1);
        let mut results = Vec::with_capacity(ports.len());

        for chunk in ports.chunks(chunk_size) {
            if cancel.is_cancelled() {
                debug!(ip = %target, scanned = results.len(), "port scan cancelled");
                return Err(ModuleError::Cancelled);
            }

            let handles: Vec<_> = chunk
                .iter()
                .map(|&port| {
                    let scanner = self.clone();
                    tokio::spawn(async move { scanner.scan_port(target, port).await })
                })
                .collect();

            for handle in handles {
                let result = handle
                    .await
                    .map_err(|e| ModuleError::Other(format!("probe task failed: {}", e)))?;
                results.push(result);
            }
        }

        results.sort_by_key(|r| r.port);
        Ok(results)
    }

    /// Scan ports and return only open ones
    pub async fn scan_open_ports(
        &self,
        target: IpAddr,
        ports: &[u16],
        cancel: &CancelSignal,
    ) -> Result<Vec<PortResult>, ModuleError> {
        Ok(self
            .scan_ports(target, ports, cancel)
            .await?
            .into_iter()
            .filter(PortResult::is_open)
            .collect())
    }
}
