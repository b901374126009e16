//! BPF map definitions for connection lifecycle tracking
//!
//! Defines the two correlation tables, the record channels to userspace and
//! the statistics counters, plus the bindings that let the reconciler use
//! the tables and channels.

use aya_ebpf::{
    macros::map,
    maps::{HashMap, PerCpuArray, PerfEventArray},
    programs::ProbeContext,
};
use tcplife_common::{
    constants::*, CompletionRecord, CorrelationTable, Ipv4Event, Ipv6Event, RecordSink,
    SockHandle, StoreError, TaskIdentity,
};

/// Birth timestamps
///
/// Key: socket address
/// Value: u64 timestamp in nanoseconds of the last early-state transition
#[map]
pub static BIRTH: HashMap<SockHandle, u64> = HashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// Owner identities captured at SYN_SENT and LAST_ACK
///
/// Key: socket address
/// Value: pid and command name of the task that was on CPU
#[map]
pub static WHOAMI: HashMap<SockHandle, TaskIdentity> =
    HashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// Completion records for IPv4 connections
#[map]
pub static IPV4_EVENTS: PerfEventArray<Ipv4Event> = PerfEventArray::new(0);

/// Completion records for IPv6 connections
#[map]
pub static IPV6_EVENTS: PerfEventArray<Ipv6Event> = PerfEventArray::new(0);

/// Statistics counters, one slot per CPU
///
/// Index: stat_id (see STAT_* constants)
/// Value: u64 counter
#[map]
pub static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(MAX_STATS, 0);

/// Returned by the kernel when inserting a new key into a full hash map
const E2BIG: i64 = 7;

/// Correlation table backed by a BPF hash map
///
/// BPF hash maps lock per bucket, so every CPU can use the same map at once.
/// A full map rejects new keys (drop-new) but still accepts updates.
pub struct BpfTable<V: 'static> {
    map: &'static HashMap<SockHandle, V>,
}

impl<V: 'static> BpfTable<V> {
    #[inline(always)]
    pub fn new(map: &'static HashMap<SockHandle, V>) -> Self {
        Self { map }
    }
}

impl<V: Copy + 'static> CorrelationTable<V> for BpfTable<V> {
    #[inline(always)]
    fn upsert(&self, handle: SockHandle, value: &V) -> Result<(), StoreError> {
        self.map.insert(&handle, value, 0).map_err(|err| {
            if err as i64 == -E2BIG {
                StoreError::Full
            } else {
                StoreError::Other(err as i64)
            }
        })
    }

    #[inline(always)]
    fn lookup(&self, handle: SockHandle) -> Option<V> {
        unsafe { self.map.get(&handle).copied() }
    }

    #[inline(always)]
    fn delete(&self, handle: SockHandle) {
        // -ENOENT when the entry is already gone
        let _ = self.map.remove(&handle);
    }
}

/// Writes completion records to the perf array matching their family
///
/// Perf buffers drop the record when the CPU's ring is full; userspace sees
/// that as a lost count on its next read.
pub struct PerfSink<'a> {
    ctx: &'a ProbeContext,
}

impl<'a> PerfSink<'a> {
    #[inline(always)]
    pub fn new(ctx: &'a ProbeContext) -> Self {
        Self { ctx }
    }
}

impl RecordSink for PerfSink<'_> {
    #[inline(always)]
    fn emit(&self, record: &CompletionRecord) {
        match record {
            CompletionRecord::V4(event) => IPV4_EVENTS.output(self.ctx, event, 0),
            CompletionRecord::V6(event) => IPV6_EVENTS.output(self.ctx, event, 0),
        }
    }
}
