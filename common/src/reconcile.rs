//! Connection lifecycle reconciliation
//!
//! Invoked once per `tcp_set_state()` call. Birth timestamps and owner
//! identities are recorded as the connection moves through its early
//! states, then folded into one [`CompletionRecord`] when it reaches
//! TCP_CLOSE.
//!
//! ## Flow
//!
//! ```text
//! early state      -> BIRTH[sk]  = now
//! SYN_SENT/LAST_ACK -> WHOAMI[sk] = current task
//! CLOSE            -> BIRTH[sk]? -- no --> drop WHOAMI[sk], missed creation
//!                          |
//!                         yes -> span, WHOAMI[sk] or current task,
//!                                byte counters, addresses -> sink
//! ```
//!
//! Nothing in here fails. Missing data is resolved by fallback or by not
//! emitting, and overflow of the tables or the sink loses data silently.
//! The returned [`Transition`] lets the caller count each of those cases.

use crate::{
    state::classify,
    types::*,
};

/// Rejected table insert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The table is at capacity and the key is not already present
    Full,
    /// Any other failure reported by the backing map (kernel errno)
    Other(i64),
}

/// One of the two correlation tables, keyed by socket handle
///
/// Implementations must tolerate concurrent calls from every CPU without
/// external locking. On overflow, inserting a new handle fails with
/// [`StoreError::Full`] while overwriting an existing one still succeeds.
pub trait CorrelationTable<V: Copy> {
    fn upsert(&self, handle: SockHandle, value: &V) -> Result<(), StoreError>;

    fn lookup(&self, handle: SockHandle) -> Option<V>;

    /// Remove the entry if present; a missing key is not an error.
    fn delete(&self, handle: SockHandle);
}

/// Read-only queries answered by the environment the probe runs in
pub trait ProbeEnv {
    /// Monotonic clock in nanoseconds
    fn now_ns(&self) -> u64;

    /// The task currently executing the probe
    fn current_task(&self) -> TaskContext;

    fn byte_counters(&self, handle: SockHandle) -> ByteCounters;

    /// Raw `skc_family` of the socket
    fn address_family(&self, handle: SockHandle) -> u16;

    fn ipv4_endpoints(&self, handle: SockHandle) -> Ipv4Endpoints;

    fn ipv6_endpoints(&self, handle: SockHandle) -> Ipv6Endpoints;
}

/// Bounded output channel for completion records
///
/// A full channel drops the record; the reconciler is never told.
pub trait RecordSink {
    fn emit(&self, record: &CompletionRecord);
}

/// Result of a single table write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableWrite {
    /// The state does not write this table
    Skipped,
    Stored,
    /// Rejected by the table, typically because it is full
    Dropped,
}

/// Where the pid and command name of an emitted record came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    /// Captured earlier at SYN_SENT or LAST_ACK
    Cached,
    /// Taken from the context running the close; may be the wrong process
    Fallback,
}

/// What one invocation did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Ignored,
    Tracked {
        birth: TableWrite,
        identity: TableWrite,
    },
    /// CLOSE without a birth record: created before tracing started, or its
    /// birth insert was dropped
    MissedCreation,
    /// CLOSE on a socket that is neither AF_INET nor AF_INET6
    UnknownFamily,
    Emitted {
        family: AddressFamily,
        identity: IdentitySource,
    },
}

/// Lifecycle reconciler over a birth table, an identity table, the
/// environment and an output sink
pub struct Reconciler<'a, B, W, E, S> {
    births: &'a B,
    owners: &'a W,
    env: &'a E,
    sink: &'a S,
}

impl<'a, B, W, E, S> Reconciler<'a, B, W, E, S>
where
    B: CorrelationTable<u64>,
    W: CorrelationTable<TaskIdentity>,
    E: ProbeEnv,
    S: RecordSink,
{
    pub fn new(births: &'a B, owners: &'a W, env: &'a E, sink: &'a S) -> Self {
        Self {
            births,
            owners,
            env,
            sink,
        }
    }

    /// Handle one `tcp_set_state(sk, state)` call
    #[inline(always)]
    pub fn on_state_transition(&self, handle: SockHandle, state: u32) -> Transition {
        let class = classify(state);

        let birth = if class.stamps_birth() {
            write(self.births, handle, &self.env.now_ns())
        } else {
            TableWrite::Skipped
        };

        let identity = if class.captures_identity() {
            write(self.owners, handle, &self.env.current_task().identity())
        } else {
            TableWrite::Skipped
        };

        if class.is_terminal() {
            return self.reconcile(handle);
        }

        match (birth, identity) {
            (TableWrite::Skipped, TableWrite::Skipped) => Transition::Ignored,
            (birth, identity) => Transition::Tracked { birth, identity },
        }
    }

    #[inline(always)]
    fn reconcile(&self, handle: SockHandle) -> Transition {
        let Some(born_ns) = self.births.lookup(handle) else {
            self.owners.delete(handle);
            return Transition::MissedCreation;
        };
        let span_us = self.env.now_ns().saturating_sub(born_ns) / 1000;
        self.births.delete(handle);

        let current = self.env.current_task();
        let (owner, source) = match self.owners.lookup(handle) {
            Some(owner) => (owner, IdentitySource::Cached),
            None => (current.identity(), IdentitySource::Fallback),
        };

        let counters = self.env.byte_counters(handle);

        let record = match AddressFamily::from_raw(self.env.address_family(handle)) {
            Some(AddressFamily::V4) => {
                let ep = self.env.ipv4_endpoints(handle);
                CompletionRecord::V4(Ipv4Event {
                    pid: owner.pid,
                    saddr: ep.saddr,
                    daddr: ep.daddr,
                    lport: ep.lport,
                    rport: ep.rport,
                    rx_b: counters.rx,
                    tx_b: counters.tx,
                    span_us,
                    comm: owner.comm,
                    uid: current.uid,
                    _padding: [0; 4],
                })
            }
            Some(AddressFamily::V6) => {
                let ep = self.env.ipv6_endpoints(handle);
                CompletionRecord::V6(Ipv6Event {
                    pid: owner.pid,
                    _padding0: [0; 4],
                    saddr: ep.saddr,
                    daddr: ep.daddr,
                    ports: pack_ports(ep.lport, ep.rport),
                    rx_b: counters.rx,
                    tx_b: counters.tx,
                    span_us,
                    comm: owner.comm,
                    uid: current.uid,
                    _padding1: [0; 4],
                })
            }
            None => {
                if source == IdentitySource::Cached {
                    self.owners.delete(handle);
                }
                return Transition::UnknownFamily;
            }
        };

        self.sink.emit(&record);

        if source == IdentitySource::Cached {
            self.owners.delete(handle);
        }

        Transition::Emitted {
            family: record.family(),
            identity: source,
        }
    }
}

#[inline(always)]
fn write<V: Copy, T: CorrelationTable<V>>(table: &T, handle: SockHandle, value: &V) -> TableWrite {
    match table.upsert(handle, value) {
        Ok(()) => TableWrite::Stored,
        Err(_) => TableWrite::Dropped,
    }
}
