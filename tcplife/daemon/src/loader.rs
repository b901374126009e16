//! eBPF program loader
//!
//! Handles loading the eBPF program, patching the socket layout into it,
//! attaching the kprobe and handing out its maps.

use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData, PerCpuArray},
    programs::KProbe,
    Bpf, BpfLoader,
};
use log::info;
use std::{collections::BTreeMap, path::PathBuf};
use tcplife_common::{
    constants::{MAX_STATS, STAT_NAMES},
    SockOffsets,
};

/// Name of the socket layout global in the eBPF object
const SOCK_OFFSETS_GLOBAL: &str = "SOCK_OFFSETS";

/// Kernel function the probe attaches to
const ATTACH_POINT: &str = "tcp_set_state";

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load eBPF program from file or embedded bytecode
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to eBPF object file. If None, uses embedded bytecode.
    /// * `offsets` - Socket field offsets for the running kernel
    ///
    /// # Returns
    ///
    /// ProbeLoader instance with loaded eBPF program
    pub fn load(path: Option<PathBuf>, offsets: SockOffsets) -> Result<Self> {
        info!("Loading eBPF program...");

        let data = if let Some(obj_path) = path {
            info!("Loading eBPF object from: {:?}", obj_path);
            std::fs::read(&obj_path)
                .with_context(|| format!("Failed to read eBPF object file: {:?}", obj_path))?
        } else {
            #[cfg(feature = "embedded")]
            {
                info!("Loading embedded eBPF program...");
                include_bytes!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../../target/bpfel-unknown-none/release/tcplife"
                ))
                .to_vec()
            }
            #[cfg(not(feature = "embedded"))]
            {
                anyhow::bail!(
                    "No eBPF object file provided. Use --ebpf-object or compile with 'embedded' feature"
                );
            }
        };

        info!("Socket layout: {:?}", offsets);

        let ebpf = BpfLoader::new()
            .set_global(SOCK_OFFSETS_GLOBAL, &offsets, true)
            .load(&data)
            .context("Failed to load eBPF program")?;

        info!("eBPF program loaded successfully");

        Ok(Self { ebpf })
    }

    /// Attach the kprobe to tcp_set_state
    pub fn attach_kprobe(&mut self) -> Result<()> {
        info!("Attaching kprobe for connection state tracking...");

        let program: &mut KProbe = self
            .ebpf
            .program_mut(ATTACH_POINT)
            .with_context(|| format!("{} program not found in eBPF object", ATTACH_POINT))?
            .try_into()
            .with_context(|| format!("Failed to get {} as KProbe", ATTACH_POINT))?;
        program
            .load()
            .with_context(|| format!("Failed to load {}", ATTACH_POINT))?;
        program
            .attach(ATTACH_POINT, 0)
            .with_context(|| format!("Failed to attach {} kprobe", ATTACH_POINT))?;
        info!("  ✓ Attached to {}", ATTACH_POINT);

        Ok(())
    }

    /// Take one of the record perf arrays out of the eBPF object
    ///
    /// # Arguments
    ///
    /// * `name` - Map name, `IPV4_EVENTS` or `IPV6_EVENTS`
    pub fn take_perf_array(&mut self, name: &str) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .ebpf
            .take_map(name)
            .with_context(|| format!("{} map not found in eBPF object", name))?;

        AsyncPerfEventArray::try_from(map)
            .with_context(|| format!("Failed to create AsyncPerfEventArray from {} map", name))
    }

    /// Read the kernel-side counters, summed across CPUs
    pub fn read_stats(&self) -> Result<BTreeMap<String, u64>> {
        let map = self
            .ebpf
            .map("STATS")
            .context("STATS map not found in eBPF object")?;
        let stats: PerCpuArray<_, u64> =
            PerCpuArray::try_from(map).context("Failed to open STATS as PerCpuArray")?;

        let mut totals = BTreeMap::new();
        for index in 0..MAX_STATS {
            let values = stats
                .get(&index, 0)
                .with_context(|| format!("Failed to read STATS[{}]", index))?;
            let total = values.iter().copied().fold(0u64, u64::saturating_add);
            totals.insert(STAT_NAMES[index as usize].to_string(), total);
        }

        Ok(totals)
    }
}
