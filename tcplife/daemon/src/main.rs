//! eBPF tcplife probe - Userspace Program
//!
//! Loads the eBPF tcplife program, attaches the tcp_set_state kprobe,
//! collects one record per closed TCP connection and exports a report.
//!
//! ## Usage
//!
//! ```bash
//! # Run for 60 seconds and write the report to tcplife-report.json
//! sudo ./tcplife --ebpf-object path/to/tcplife --duration 60
//!
//! # Print every closed connection as a JSON line, run until ctrl-c
//! sudo ./tcplife --ebpf-object path/to/tcplife --duration 0 --stream
//!
//! # Different tcp_sock layout (see `pahole -C tcp_sock`)
//! sudo ./tcplife --ebpf-object path/to/tcplife --bytes-received-offset 1488 --bytes-acked-offset 1560
//! ```

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};
use tcplife::{
    collector::{LifeCollector, DEFAULT_KEEP},
    events::EventProcessor,
    exporter::{JsonExporter, ReportExporter},
    loader::ProbeLoader,
    types::{Family, LifeReport},
};
use tcplife_common::SockOffsets;
use tokio::{
    signal,
    sync::Mutex,
    time::{sleep, Instant},
};

/// TCP connection lifespan tracer using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Duration to run the probe (in seconds, 0 = infinite)
    #[clap(short, long, default_value_t = 60)]
    duration: u64,

    /// Output file for the report
    #[clap(short, long, default_value = "tcplife-report.json")]
    output: PathBuf,

    /// Print each closed connection as a JSON line on stdout
    #[clap(long)]
    stream: bool,

    /// Number of recent connections kept in the report
    #[clap(long, default_value_t = DEFAULT_KEEP)]
    keep: usize,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    #[clap(flatten)]
    offsets: OffsetArgs,
}

/// Kernel structure offsets, in bytes
#[derive(clap::Args, Debug)]
struct OffsetArgs {
    /// Offset of sock_common.skc_daddr
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_daddr)]
    skc_daddr_offset: u32,

    /// Offset of sock_common.skc_rcv_saddr
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_rcv_saddr)]
    skc_rcv_saddr_offset: u32,

    /// Offset of sock_common.skc_dport
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_dport)]
    skc_dport_offset: u32,

    /// Offset of sock_common.skc_num
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_num)]
    skc_num_offset: u32,

    /// Offset of sock_common.skc_family
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_family)]
    skc_family_offset: u32,

    /// Offset of sock_common.skc_v6_daddr
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_v6_daddr)]
    skc_v6_daddr_offset: u32,

    /// Offset of sock_common.skc_v6_rcv_saddr
    #[clap(long, default_value_t = SockOffsets::DEFAULT.skc_v6_rcv_saddr)]
    skc_v6_rcv_saddr_offset: u32,

    /// Offset of tcp_sock.bytes_received
    #[clap(long, default_value_t = SockOffsets::DEFAULT.bytes_received)]
    bytes_received_offset: u32,

    /// Offset of tcp_sock.bytes_acked
    #[clap(long, default_value_t = SockOffsets::DEFAULT.bytes_acked)]
    bytes_acked_offset: u32,
}

impl From<&OffsetArgs> for SockOffsets {
    fn from(args: &OffsetArgs) -> Self {
        SockOffsets {
            skc_daddr: args.skc_daddr_offset,
            skc_rcv_saddr: args.skc_rcv_saddr_offset,
            skc_dport: args.skc_dport_offset,
            skc_num: args.skc_num_offset,
            skc_family: args.skc_family_offset,
            skc_v6_daddr: args.skc_v6_daddr_offset,
            skc_v6_rcv_saddr: args.skc_v6_rcv_saddr_offset,
            bytes_received: args.bytes_received_offset,
            bytes_acked: args.bytes_acked_offset,
            _padding: 0,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting eBPF tcplife probe...");
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!("   Output: {:?}", args.output);
    info!("   Keeping last {} connections", args.keep);

    if args.progress_interval == 0 {
        anyhow::bail!("Progress interval must be >= 1");
    }

    // Load eBPF program
    let mut loader = ProbeLoader::load(args.ebpf_object.clone(), SockOffsets::from(&args.offsets))?;

    // Attach kprobe
    loader.attach_kprobe()?;

    // Get both record channels
    let ipv4_events = loader.take_perf_array("IPV4_EVENTS")?;
    let ipv6_events = loader.take_perf_array("IPV6_EVENTS")?;

    info!("Tracing TCP connections...");

    let collector = Arc::new(Mutex::new(LifeCollector::new(args.keep)));

    let processor = EventProcessor::new(Arc::clone(&collector), args.stream, args.verbose);

    // Spawn per-CPU record readers
    processor.spawn_cpu_readers(ipv4_events, Family::Ipv4)?;
    processor.spawn_cpu_readers(ipv6_events, Family::Ipv6)?;

    processor.spawn_progress_reporter(args.progress_interval);

    // Run for specified duration or until interrupted
    let start_time = Instant::now();
    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    let elapsed = start_time.elapsed().as_secs();

    info!("Generating report...");

    let probe_stats = match loader.read_stats() {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Could not read probe statistics: {:#}", e);
            BTreeMap::new()
        }
    };

    let report = collector.lock().await.generate_report(elapsed, probe_stats);

    JsonExporter::new(args.output.clone(), true).export(&report)?;
    info!("Report written to {:?}", args.output);

    print_summary(&report);

    Ok(())
}

fn print_summary(report: &LifeReport) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Connections closed: {}", report.total_connections);
    info!("    IPv4:             {}", report.ipv4_connections);
    info!("    IPv6:             {}", report.ipv6_connections);
    info!("  Records lost:       {}", report.lost_records);
    info!("  Duration:           {} seconds", report.duration_seconds);
    info!("");
    info!("  Bytes:");
    info!("    received: {:>14}", report.bytes.rx);
    info!("    sent:     {:>14}", report.bytes.tx);
    info!("");
    info!("  Lifespan (μs):");
    info!("    min:  {:>12}", report.lifespan.min_us);
    info!("    avg:  {:>12.1}", report.lifespan.avg_us);
    info!("    max:  {:>12}", report.lifespan.max_us);
    info!("");
    info!("  Histogram:");
    info!("    0-1ms:       {:>8}", report.histogram.bucket_0_1ms);
    info!("    1-10ms:      {:>8}", report.histogram.bucket_1_10ms);
    info!("    10-100ms:    {:>8}", report.histogram.bucket_10_100ms);
    info!("    100ms-1s:    {:>8}", report.histogram.bucket_100ms_1s);
    info!("    1-10s:       {:>8}", report.histogram.bucket_1_10s);
    info!("    10s+:        {:>8}", report.histogram.bucket_10s_plus);
    if !report.probe_stats.is_empty() {
        info!("");
        info!("  Probe counters:");
        for (name, value) in &report.probe_stats {
            info!("    {:<20} {:>10}", name, value);
        }
    }
    info!("");
    info!("============================================");
}
