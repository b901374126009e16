//! Shared types and connection lifecycle correlation for the tcplife probe
//!
//! This crate provides the record layouts and constants shared between the
//! eBPF kernel program and the userspace daemon, together with the
//! reconciler that runs inside the kernel program. The reconciler is
//! written against small traits so that it can be driven by BPF maps in the
//! kernel and by in-memory doubles in tests.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod constants;
pub mod reconcile;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use constants::*;
pub use reconcile::{
    CorrelationTable, IdentitySource, ProbeEnv, Reconciler, RecordSink, StoreError, TableWrite,
    Transition,
};
pub use state::{classify, StateClass, TcpState};
pub use types::{
    pack_ports, unpack_ports, AddressFamily, ByteCounters, CompletionRecord, Ipv4Endpoints,
    Ipv4Event, Ipv6Endpoints, Ipv6Event, SockHandle, SockOffsets, TaskContext, TaskIdentity,
};
