//! Report exporters

use crate::types::LifeReport;
use anyhow::{Context, Result};
use std::{fs::File, io::Write, path::PathBuf};

/// Trait for report exporters
pub trait ReportExporter {
    /// Export the report
    ///
    /// # Arguments
    ///
    /// * `report` - Aggregated report to export
    fn export(&self, report: &LifeReport) -> Result<()>;
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl ReportExporter for JsonExporter {
    fn export(&self, report: &LifeReport) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        let mut file = File::create(&self.output_path)
            .with_context(|| format!("Failed to create output file: {:?}", self.output_path))?;

        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write to output file: {:?}", self.output_path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::LifeCollector;
    use crate::types::{ConnectionRecord, Family};
    use std::collections::BTreeMap;
    use std::net::{IpAddr, Ipv4Addr};

    fn create_test_report() -> LifeReport {
        let mut collector = LifeCollector::new(5);
        collector.add_record(ConnectionRecord {
            pid: 42,
            uid: 1000,
            comm: "curl".to_string(),
            family: Family::Ipv4,
            local_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            local_port: 51000,
            remote_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            remote_port: 443,
            rx_bytes: 2048,
            tx_bytes: 128,
            lifespan_us: 12_500,
        });

        let mut stats = BTreeMap::new();
        stats.insert("missed_creation".to_string(), 3);
        collector.generate_report(60, stats)
    }

    #[test]
    fn test_json_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        JsonExporter::new(path.clone(), true)
            .export(&create_test_report())
            .unwrap();

        let written: LifeReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.duration_seconds, 60);
        assert_eq!(written.total_connections, 1);
        assert_eq!(written.recent[0].comm, "curl");
        assert_eq!(written.probe_stats["missed_creation"], 3);
    }

    #[test]
    fn test_compact_export_is_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        JsonExporter::new(path.clone(), false)
            .export(&create_test_report())
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains('\n'));
        assert!(text.contains("\"10-100ms\":1"));
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");

        let err = JsonExporter::new(path, false)
            .export(&create_test_report())
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create output file"));
    }
}
