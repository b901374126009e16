//! In-memory stand-ins for the kernel side of the reconciler

use crate::{
    constants::{AF_INET, AF_INET6, TASK_COMM_LEN},
    reconcile::{CorrelationTable, ProbeEnv, RecordSink, StoreError},
    types::*,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    vec::Vec,
};

pub fn comm(name: &str) -> [u8; TASK_COMM_LEN] {
    let mut out = [0u8; TASK_COMM_LEN];
    let len = name.len().min(TASK_COMM_LEN - 1);
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

/// Capacity-bounded table with the same overflow behavior as a BPF hash map
pub struct BoundedTable<V> {
    capacity: usize,
    entries: Mutex<BTreeMap<SockHandle, V>>,
}

impl<V: Copy> BoundedTable<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Copy> CorrelationTable<V> for BoundedTable<V> {
    fn upsert(&self, handle: SockHandle, value: &V) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(&handle) {
            return Err(StoreError::Full);
        }
        entries.insert(handle, *value);
        Ok(())
    }

    fn lookup(&self, handle: SockHandle) -> Option<V> {
        self.entries.lock().unwrap().get(&handle).copied()
    }

    fn delete(&self, handle: SockHandle) {
        self.entries.lock().unwrap().remove(&handle);
    }
}

#[derive(Clone, Copy, Default)]
struct FakeSock {
    family: u16,
    counters: ByteCounters,
    v4: Ipv4Endpoints,
    v6: Ipv6Endpoints,
}

/// Environment whose clock, current task and sockets are set by the test
pub struct ScriptedEnv {
    now: AtomicU64,
    task: Mutex<TaskContext>,
    socks: Mutex<BTreeMap<SockHandle, FakeSock>>,
}

impl ScriptedEnv {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            task: Mutex::new(TaskContext {
                pid: 1,
                uid: 0,
                comm: comm("init"),
            }),
            socks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_now(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }

    pub fn set_task(&self, pid: u32, uid: u32, name: &str) {
        *self.task.lock().unwrap() = TaskContext {
            pid,
            uid,
            comm: comm(name),
        };
    }

    pub fn add_ipv4_socket(
        &self,
        handle: SockHandle,
        saddr: [u8; 4],
        daddr: [u8; 4],
        lport: u16,
        rport: u16,
    ) {
        let mut socks = self.socks.lock().unwrap();
        let sock = socks.entry(handle).or_default();
        sock.family = AF_INET;
        sock.v4 = Ipv4Endpoints {
            saddr: u32::from_ne_bytes(saddr),
            daddr: u32::from_ne_bytes(daddr),
            lport,
            rport,
        };
    }

    pub fn add_ipv6_socket(
        &self,
        handle: SockHandle,
        saddr: [u8; 16],
        daddr: [u8; 16],
        lport: u16,
        rport: u16,
    ) {
        let mut socks = self.socks.lock().unwrap();
        let sock = socks.entry(handle).or_default();
        sock.family = AF_INET6;
        sock.v6 = Ipv6Endpoints {
            saddr,
            daddr,
            lport,
            rport,
        };
    }

    pub fn set_family(&self, handle: SockHandle, family: u16) {
        self.socks.lock().unwrap().entry(handle).or_default().family = family;
    }

    pub fn set_counters(&self, handle: SockHandle, rx: u64, tx: u64) {
        self.socks.lock().unwrap().entry(handle).or_default().counters = ByteCounters { rx, tx };
    }

    fn sock(&self, handle: SockHandle) -> FakeSock {
        self.socks
            .lock()
            .unwrap()
            .get(&handle)
            .copied()
            .unwrap_or_default()
    }
}

impl ProbeEnv for ScriptedEnv {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn current_task(&self) -> TaskContext {
        *self.task.lock().unwrap()
    }

    fn byte_counters(&self, handle: SockHandle) -> ByteCounters {
        self.sock(handle).counters
    }

    fn address_family(&self, handle: SockHandle) -> u16 {
        self.sock(handle).family
    }

    fn ipv4_endpoints(&self, handle: SockHandle) -> Ipv4Endpoints {
        self.sock(handle).v4
    }

    fn ipv6_endpoints(&self, handle: SockHandle) -> Ipv6Endpoints {
        self.sock(handle).v6
    }
}

/// Bounded sink that counts what it had to drop
pub struct RecordingSink {
    capacity: usize,
    records: Mutex<Vec<CompletionRecord>>,
    dropped: AtomicU64,
}

impl RecordingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn take_all(&self) -> Vec<CompletionRecord> {
        core::mem::take(&mut *self.records.lock().unwrap())
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl RecordSink for RecordingSink {
    fn emit(&self, record: &CompletionRecord) {
        let mut records = self.records.lock().unwrap();
        if records.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        records.push(*record);
    }
}
