//! Userspace type definitions
//!
//! Defines the data structures used by the userspace program for
//! record decoding, aggregation and export.
//!
//! ## Organization
//!
//! This module separates kernel and userspace types:
//! - **Kernel Types**: Types shared with eBPF programs (from tcplife_common)
//! - **Userspace Types**: Types used only in userspace for aggregation and export

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between kernel eBPF programs and userspace
    //!
    //! These are re-exported from the tcplife-common crate and must
    //! maintain binary compatibility with the eBPF programs.

    pub use tcplife_common::constants;
    pub use tcplife_common::types::{Ipv4Event, Ipv6Event, SockOffsets};
}

pub use kernel::{Ipv4Event, Ipv6Event};

use tcplife_common::types::{comm_bytes, unpack_ports};

/// Address family of a closed connection
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ipv4,
    Ipv6,
}

/// One closed connection, decoded from a kernel completion record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Owning process ID (best-effort)
    pub pid: u32,
    /// User ID of the task that ran the close
    pub uid: u32,
    /// Command name of the owning process
    pub comm: String,
    pub family: Family,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Time since the last early-state transition, in microseconds
    pub lifespan_us: u64,
}

impl ConnectionRecord {
    /// String in format "laddr:lport -> raddr:rport"
    pub fn endpoints(&self) -> String {
        format!(
            "{} -> {}",
            std::net::SocketAddr::new(self.local_addr, self.local_port),
            std::net::SocketAddr::new(self.remote_addr, self.remote_port)
        )
    }
}

fn comm_to_string(comm: &[u8; tcplife_common::constants::TASK_COMM_LEN]) -> String {
    String::from_utf8_lossy(comm_bytes(comm)).into_owned()
}

impl From<&Ipv4Event> for ConnectionRecord {
    fn from(event: &Ipv4Event) -> Self {
        Self {
            pid: event.pid,
            uid: event.uid,
            comm: comm_to_string(&event.comm),
            family: Family::Ipv4,
            // Addresses arrive in network byte order
            local_addr: IpAddr::V4(Ipv4Addr::from(u32::from_be(event.saddr))),
            local_port: event.lport,
            remote_addr: IpAddr::V4(Ipv4Addr::from(u32::from_be(event.daddr))),
            remote_port: event.rport,
            rx_bytes: event.rx_b,
            tx_bytes: event.tx_b,
            lifespan_us: event.span_us,
        }
    }
}

impl From<&Ipv6Event> for ConnectionRecord {
    fn from(event: &Ipv6Event) -> Self {
        let (local_port, remote_port) = unpack_ports(event.ports);
        Self {
            pid: event.pid,
            uid: event.uid,
            comm: comm_to_string(&event.comm),
            family: Family::Ipv6,
            local_addr: IpAddr::V6(Ipv6Addr::from(event.saddr)),
            local_port,
            remote_addr: IpAddr::V6(Ipv6Addr::from(event.daddr)),
            remote_port,
            rx_bytes: event.rx_b,
            tx_bytes: event.tx_b,
            lifespan_us: event.span_us,
        }
    }
}

/// Aggregated report for export
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LifeReport {
    /// ISO 8601 timestamp when the report was generated
    pub timestamp: String,
    /// Duration of collection period in seconds
    pub duration_seconds: u64,
    /// Number of completion records received
    pub total_connections: u64,
    pub ipv4_connections: u64,
    pub ipv6_connections: u64,
    /// Records dropped by full perf buffers
    pub lost_records: u64,
    pub bytes: ByteTotals,
    pub lifespan: LifespanSummary,
    pub histogram: LifespanHistogram,
    /// Per-command totals
    pub commands: HashMap<String, CommandTotals>,
    /// Kernel-side counters, summed across CPUs
    pub probe_stats: BTreeMap<String, u64>,
    /// Most recent records, oldest first
    pub recent: Vec<ConnectionRecord>,
}

/// Byte totals across all connections
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteTotals {
    pub rx: u64,
    pub tx: u64,
}

/// Lifespan statistics in microseconds
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LifespanSummary {
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
}

/// Per-command connection totals
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandTotals {
    pub connections: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Lifespan histogram buckets
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct LifespanHistogram {
    #[serde(rename = "0-1ms")]
    pub bucket_0_1ms: u64,
    #[serde(rename = "1-10ms")]
    pub bucket_1_10ms: u64,
    #[serde(rename = "10-100ms")]
    pub bucket_10_100ms: u64,
    #[serde(rename = "100ms-1s")]
    pub bucket_100ms_1s: u64,
    #[serde(rename = "1-10s")]
    pub bucket_1_10s: u64,
    #[serde(rename = "10s+")]
    pub bucket_10s_plus: u64,
}

impl LifespanHistogram {
    /// Add a sample to the appropriate bucket
    ///
    /// # Arguments
    ///
    /// * `lifespan_us` - Lifespan in microseconds
    pub fn add_sample(&mut self, lifespan_us: u64) {
        match lifespan_us {
            l if l < 1_000 => self.bucket_0_1ms += 1,
            l if l < 10_000 => self.bucket_1_10ms += 1,
            l if l < 100_000 => self.bucket_10_100ms += 1,
            l if l < 1_000_000 => self.bucket_100ms_1s += 1,
            l if l < 10_000_000 => self.bucket_1_10s += 1,
            _ => self.bucket_10s_plus += 1,
        }
    }

    /// Get total count across all buckets
    pub fn total_count(&self) -> u64 {
        self.bucket_0_1ms
            + self.bucket_1_10ms
            + self.bucket_10_100ms
            + self.bucket_100ms_1s
            + self.bucket_1_10s
            + self.bucket_10s_plus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcplife_common::pack_ports;

    fn comm(name: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out
    }

    #[test]
    fn test_ipv4_event_conversion() {
        let event = Ipv4Event {
            pid: 4242,
            saddr: u32::from_ne_bytes([10, 0, 0, 1]),
            daddr: u32::from_ne_bytes([93, 184, 216, 34]),
            lport: 51234,
            rport: 443,
            rx_b: 9000,
            tx_b: 512,
            span_us: 1_500,
            comm: comm("curl"),
            uid: 1000,
            _padding: [0; 4],
        };

        let record = ConnectionRecord::from(&event);
        assert_eq!(record.family, Family::Ipv4);
        assert_eq!(record.local_addr, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(record.remote_addr, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert_eq!(record.comm, "curl");
        assert_eq!(record.endpoints(), "10.0.0.1:51234 -> 93.184.216.34:443");
    }

    #[test]
    fn test_ipv6_event_unpacks_ports() {
        let event = Ipv6Event {
            pid: 7,
            _padding0: [0; 4],
            saddr: Ipv6Addr::LOCALHOST.octets(),
            daddr: "2001:db8::2".parse::<Ipv6Addr>().unwrap().octets(),
            ports: pack_ports(40000, 8443),
            rx_b: 1,
            tx_b: 2,
            span_us: 3,
            comm: comm("sshd"),
            uid: 0,
            _padding1: [0; 4],
        };

        let record = ConnectionRecord::from(&event);
        assert_eq!(record.local_port, 40000);
        assert_eq!(record.remote_port, 8443);
        assert_eq!(record.endpoints(), "[::1]:40000 -> [2001:db8::2]:8443");
    }

    #[test]
    fn test_full_length_comm() {
        let mut event_comm = [b'a'; 16];
        event_comm[15] = b'z';
        assert_eq!(comm_to_string(&event_comm).len(), 16);
    }

    #[test]
    fn test_lifespan_histogram_buckets() {
        let mut histogram = LifespanHistogram::default();
        for us in [10, 5_000, 50_000, 500_000, 5_000_000, 50_000_000] {
            histogram.add_sample(us);
        }
        assert_eq!(histogram.bucket_0_1ms, 1);
        assert_eq!(histogram.bucket_1_10ms, 1);
        assert_eq!(histogram.bucket_10_100ms, 1);
        assert_eq!(histogram.bucket_100ms_1s, 1);
        assert_eq!(histogram.bucket_1_10s, 1);
        assert_eq!(histogram.bucket_10s_plus, 1);
        assert_eq!(histogram.total_count(), 6);
    }

    #[test]
    fn test_record_serializes_family_lowercase() {
        let event = Ipv6Event {
            pid: 1,
            _padding0: [0; 4],
            saddr: [0; 16],
            daddr: [0; 16],
            ports: 0,
            rx_b: 0,
            tx_b: 0,
            span_us: 0,
            comm: comm("x"),
            uid: 0,
            _padding1: [0; 4],
        };
        let json = serde_json::to_string(&ConnectionRecord::from(&event)).unwrap();
        assert!(json.contains("\"family\":\"ipv6\""));
    }
}
