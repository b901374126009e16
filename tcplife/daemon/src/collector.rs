//! Connection record collection and aggregation
//!
//! Aggregates completion records from the kernel and keeps the most recent
//! ones for the final report.

use crate::types::*;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Default number of recent records kept for the report
pub const DEFAULT_KEEP: usize = 1000;

/// Collector for aggregating connection records
pub struct LifeCollector {
    /// Most recent records, bounded by `keep`
    recent: VecDeque<ConnectionRecord>,
    keep: usize,
    total: u64,
    ipv4: u64,
    ipv6: u64,
    lost: u64,
    bytes: ByteTotals,
    lifespan_min_us: u64,
    lifespan_max_us: u64,
    lifespan_sum_us: u128,
    histogram: LifespanHistogram,
    commands: HashMap<String, CommandTotals>,
}

impl Default for LifeCollector {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP)
    }
}

impl LifeCollector {
    /// Create a new collector keeping at most `keep` recent records
    pub fn new(keep: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(keep.min(DEFAULT_KEEP)),
            keep,
            total: 0,
            ipv4: 0,
            ipv6: 0,
            lost: 0,
            bytes: ByteTotals::default(),
            lifespan_min_us: u64::MAX,
            lifespan_max_us: 0,
            lifespan_sum_us: 0,
            histogram: LifespanHistogram::default(),
            commands: HashMap::new(),
        }
    }

    /// Add a decoded record to the collector
    pub fn add_record(&mut self, record: ConnectionRecord) {
        self.total += 1;
        match record.family {
            Family::Ipv4 => self.ipv4 += 1,
            Family::Ipv6 => self.ipv6 += 1,
        }

        self.bytes.rx = self.bytes.rx.saturating_add(record.rx_bytes);
        self.bytes.tx = self.bytes.tx.saturating_add(record.tx_bytes);

        self.lifespan_min_us = self.lifespan_min_us.min(record.lifespan_us);
        self.lifespan_max_us = self.lifespan_max_us.max(record.lifespan_us);
        self.lifespan_sum_us += record.lifespan_us as u128;
        self.histogram.add_sample(record.lifespan_us);

        let totals = self.commands.entry(record.comm.clone()).or_default();
        totals.connections += 1;
        totals.rx_bytes = totals.rx_bytes.saturating_add(record.rx_bytes);
        totals.tx_bytes = totals.tx_bytes.saturating_add(record.tx_bytes);

        if self.keep == 0 {
            return;
        }
        if self.recent.len() == self.keep {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    /// Account for records the perf buffer had to drop
    pub fn record_lost(&mut self, count: usize) {
        self.lost += count as u64;
    }

    /// Generate the aggregated report
    ///
    /// # Arguments
    ///
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `probe_stats` - Kernel-side counters, keyed by name
    pub fn generate_report(&self, elapsed_secs: u64, probe_stats: BTreeMap<String, u64>) -> LifeReport {
        let lifespan = if self.total == 0 {
            LifespanSummary::default()
        } else {
            LifespanSummary {
                min_us: self.lifespan_min_us,
                max_us: self.lifespan_max_us,
                avg_us: self.lifespan_sum_us as f64 / self.total as f64,
            }
        };

        LifeReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            total_connections: self.total,
            ipv4_connections: self.ipv4,
            ipv6_connections: self.ipv6,
            lost_records: self.lost,
            bytes: self.bytes.clone(),
            lifespan,
            histogram: self.histogram.clone(),
            commands: self.commands.clone(),
            probe_stats,
            recent: self.recent.iter().cloned().collect(),
        }
    }

    /// Get number of records collected
    pub fn record_count(&self) -> u64 {
        self.total
    }

    /// Get number of records lost in the perf buffers
    pub fn lost_count(&self) -> u64 {
        self.lost
    }

    /// Get histogram reference
    pub fn histogram(&self) -> &LifespanHistogram {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn record(comm: &str, lifespan_us: u64, rx: u64, tx: u64) -> ConnectionRecord {
        ConnectionRecord {
            pid: 100,
            uid: 1000,
            comm: comm.to_string(),
            family: Family::Ipv4,
            local_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_port: 40000,
            remote_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            remote_port: 80,
            rx_bytes: rx,
            tx_bytes: tx,
            lifespan_us,
        }
    }

    #[test]
    fn test_collector_basic() {
        let mut collector = LifeCollector::new(10);
        collector.add_record(record("curl", 2_000, 100, 10));
        collector.add_record(record("curl", 4_000, 300, 30));
        collector.add_record(record("wget", 9_000, 0, 0));

        let report = collector.generate_report(5, BTreeMap::new());
        assert_eq!(report.total_connections, 3);
        assert_eq!(report.ipv4_connections, 3);
        assert_eq!(report.bytes, ByteTotals { rx: 400, tx: 40 });
        assert_eq!(report.lifespan.min_us, 2_000);
        assert_eq!(report.lifespan.max_us, 9_000);
        assert_eq!(report.lifespan.avg_us, 5_000.0);
        assert_eq!(report.commands["curl"].connections, 2);
        assert_eq!(report.commands["curl"].rx_bytes, 400);
        assert_eq!(report.commands["wget"].connections, 1);
        assert_eq!(report.histogram.bucket_1_10ms, 3);
    }

    #[test]
    fn test_recent_records_are_bounded() {
        let mut collector = LifeCollector::new(2);
        for span in [1, 2, 3] {
            collector.add_record(record("nc", span, 0, 0));
        }

        let report = collector.generate_report(1, BTreeMap::new());
        let spans: Vec<u64> = report.recent.iter().map(|r| r.lifespan_us).collect();
        assert_eq!(spans, vec![2, 3]);
        assert_eq!(report.total_connections, 3);
    }

    #[test]
    fn test_keep_zero_only_aggregates() {
        let mut collector = LifeCollector::new(0);
        collector.add_record(record("nc", 1, 0, 0));
        let report = collector.generate_report(1, BTreeMap::new());
        assert!(report.recent.is_empty());
        assert_eq!(report.total_connections, 1);
    }

    #[test]
    fn test_empty_report() {
        let collector = LifeCollector::default();
        let report = collector.generate_report(0, BTreeMap::new());
        assert_eq!(report.total_connections, 0);
        assert_eq!(report.lifespan, LifespanSummary::default());
    }

    #[test]
    fn test_lost_records() {
        let mut collector = LifeCollector::default();
        collector.record_lost(3);
        collector.record_lost(2);
        assert_eq!(collector.lost_count(), 5);
        assert_eq!(collector.generate_report(1, BTreeMap::new()).lost_records, 5);
    }
}
