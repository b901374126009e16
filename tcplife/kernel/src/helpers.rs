//! Helper functions for eBPF programs
//!
//! Provides safe wrappers around BPF helper functions and the kernel
//! implementation of the reconciler's environment queries.

use aya_ebpf::helpers::{
    bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid, bpf_ktime_get_ns,
};
use tcplife_common::{
    constants::TASK_COMM_LEN, ByteCounters, Ipv4Endpoints, Ipv6Endpoints, ProbeEnv, SockHandle,
    TaskContext,
};

use crate::socket_parser::*;

/// Get current timestamp in nanoseconds
#[inline(always)]
pub fn get_timestamp() -> u64 {
    unsafe { bpf_ktime_get_ns() }
}

/// Get current process ID
#[inline(always)]
pub fn get_pid() -> u32 {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    (pid_tgid >> 32) as u32
}

/// Get current user ID
#[inline(always)]
pub fn get_uid() -> u32 {
    let uid_gid = unsafe { bpf_get_current_uid_gid() };
    (uid_gid & 0xFFFFFFFF) as u32
}

/// Get current command name, empty if the helper fails
#[inline(always)]
pub fn get_comm() -> [u8; TASK_COMM_LEN] {
    bpf_get_current_comm().unwrap_or([0; TASK_COMM_LEN])
}

/// Increment a statistics counter
///
/// Each CPU owns its slot, so a plain add does not race.
#[inline(always)]
pub fn increment_stat(stat_id: u32) {
    use crate::maps::STATS;

    if let Some(count) = STATS.get_ptr_mut(stat_id) {
        unsafe { *count += 1 };
    }
}

/// Environment seen from inside the kprobe
pub struct KernelEnv;

impl ProbeEnv for KernelEnv {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        get_timestamp()
    }

    #[inline(always)]
    fn current_task(&self) -> TaskContext {
        TaskContext {
            pid: get_pid(),
            uid: get_uid(),
            comm: get_comm(),
        }
    }

    #[inline(always)]
    fn byte_counters(&self, handle: SockHandle) -> ByteCounters {
        read_byte_counters(handle)
    }

    #[inline(always)]
    fn address_family(&self, handle: SockHandle) -> u16 {
        read_family(handle)
    }

    #[inline(always)]
    fn ipv4_endpoints(&self, handle: SockHandle) -> Ipv4Endpoints {
        read_ipv4_endpoints(handle)
    }

    #[inline(always)]
    fn ipv6_endpoints(&self, handle: SockHandle) -> Ipv6Endpoints {
        read_ipv6_endpoints(handle)
    }
}
