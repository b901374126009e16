//! Record processing from eBPF perf buffers
//!
//! Handles reading completion records from the per-CPU perf buffers of
//! both record channels and processing them asynchronously.

use crate::{
    collector::LifeCollector,
    types::{ConnectionRecord, Family, Ipv4Event, Ipv6Event},
};
use anyhow::Result;
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use log::{debug, info, warn};
use std::{mem, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::interval};

/// Number of buffers handed to each perf read
const READ_BATCH: usize = 10;

/// Decode one raw perf sample of the given family
///
/// Returns None if the sample is shorter than the record layout.
pub fn decode_record(family: Family, data: &[u8]) -> Option<ConnectionRecord> {
    match family {
        Family::Ipv4 => read_event::<Ipv4Event>(data).map(|ev| ConnectionRecord::from(&ev)),
        Family::Ipv6 => read_event::<Ipv6Event>(data).map(|ev| ConnectionRecord::from(&ev)),
    }
}

fn read_event<T: Copy>(data: &[u8]) -> Option<T> {
    if data.len() < mem::size_of::<T>() {
        return None;
    }
    let ptr = data.as_ptr() as *const T;
    // Perf samples carry no alignment guarantee
    Some(unsafe { ptr.read_unaligned() })
}

fn record_size(family: Family) -> usize {
    match family {
        Family::Ipv4 => mem::size_of::<Ipv4Event>(),
        Family::Ipv6 => mem::size_of::<Ipv6Event>(),
    }
}

/// Record processor that reads from perf buffers
pub struct EventProcessor {
    collector: Arc<Mutex<LifeCollector>>,
    stream: bool,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new record processor
    ///
    /// # Arguments
    ///
    /// * `collector` - Shared record collector
    /// * `stream` - Print every record as a JSON line on stdout
    /// * `verbose` - Enable verbose logging
    pub fn new(collector: Arc<Mutex<LifeCollector>>, stream: bool, verbose: bool) -> Self {
        Self {
            collector,
            stream,
            verbose,
        }
    }

    /// Spawn per-CPU readers for one record channel
    ///
    /// Creates a task for each CPU to read records from its perf buffer.
    ///
    /// # Arguments
    ///
    /// * `perf_array` - Perf event array from the eBPF program
    /// * `family` - Record layout carried by this array
    pub fn spawn_cpu_readers(
        &self,
        mut perf_array: AsyncPerfEventArray<MapData>,
        family: Family,
    ) -> Result<()> {
        let cpus = online_cpus()?;
        info!("Spawning {:?} record readers for {} CPUs", family, cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let collector = Arc::clone(&self.collector);
            let stream = self.stream;
            let verbose = self.verbose;

            tokio::spawn(async move {
                let mut buffers = (0..READ_BATCH)
                    .map(|_| BytesMut::with_capacity(record_size(family)))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading {:?} records from CPU {}: {}", family, cpu_id, e);
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        warn!(
                            "Lost {} {:?} records on CPU {} (perf buffer full)",
                            events.lost, family, cpu_id
                        );
                        collector.lock().await.record_lost(events.lost);
                    }

                    for raw in buffers.iter().take(events.read) {
                        let Some(record) = decode_record(family, raw) else {
                            warn!("Short {:?} record ({} bytes) on CPU {}", family, raw.len(), cpu_id);
                            continue;
                        };

                        if verbose {
                            debug!(
                                "{} pid={} comm={} rx={} tx={} span={:.3}ms",
                                record.endpoints(),
                                record.pid,
                                record.comm,
                                record.rx_bytes,
                                record.tx_bytes,
                                record.lifespan_us as f64 / 1000.0
                            );
                        }

                        if stream {
                            match serde_json::to_string(&record) {
                                Ok(line) => println!("{}", line),
                                Err(e) => warn!("Failed to serialize record: {}", e),
                            }
                        }

                        collector.lock().await.add_record(record);
                    }
                }
            });
        }

        Ok(())
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports collection progress.
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Reporting interval in seconds
    pub fn spawn_progress_reporter(&self, interval_secs: u64) {
        let collector_clone = Arc::clone(&self.collector);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                ticker.tick().await;

                let collector = collector_clone.lock().await;
                info!(
                    "Progress: {} connections closed, {} records lost",
                    collector.record_count(),
                    collector.lost_count()
                );
            }
        });
    }
}
