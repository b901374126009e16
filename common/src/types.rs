//! Shared data structures between kernel and userspace
//!
//! The event structures must be repr(C) to ensure consistent memory layout
//! between eBPF programs and userspace code. Field order is part of the
//! wire format read by the daemon; do not reorder.

use crate::constants::{AF_INET, AF_INET6, TASK_COMM_LEN};

/// Runtime address of a connection's `struct sock`
///
/// Only meaningful between the connection's creation and its TCP_CLOSE
/// transition. A freed socket address can be handed to an unrelated
/// connection, and the two are indistinguishable here.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SockHandle(pub u64);

impl SockHandle {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }
}

/// Owning process captured while the connection's owner is on CPU
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskIdentity {
    /// Process ID (kernel tgid)
    pub pid: u32,
    /// Command name, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
}

/// Identity of whatever task is currently executing the probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
    pub pid: u32,
    pub uid: u32,
    pub comm: [u8; TASK_COMM_LEN],
}

impl TaskContext {
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            pid: self.pid,
            comm: self.comm,
        }
    }
}

/// Byte counters read from `struct tcp_sock`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteCounters {
    /// `bytes_received`
    pub rx: u64,
    /// `bytes_acked`
    pub tx: u64,
}

/// Address family of a socket, as far as this probe cares
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn from_raw(family: u16) -> Option<Self> {
        match family {
            AF_INET => Some(Self::V4),
            AF_INET6 => Some(Self::V6),
            _ => None,
        }
    }
}

/// IPv4 addressing of a socket
///
/// Addresses are in network byte order, ports in host byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ipv4Endpoints {
    pub saddr: u32,
    pub daddr: u32,
    pub lport: u16,
    pub rport: u16,
}

/// IPv6 addressing of a socket
///
/// Addresses are raw `in6_addr` bytes, ports in host byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ipv6Endpoints {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub lport: u16,
    pub rport: u16,
}

/// Completion record for an IPv4 connection
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Event {
    /// Process ID (cached owner, or the closing context)
    pub pid: u32,
    /// Local address (network byte order)
    pub saddr: u32,
    /// Remote address (network byte order)
    pub daddr: u32,
    /// Local port (host byte order)
    pub lport: u16,
    /// Remote port (host byte order)
    pub rport: u16,
    /// Bytes received
    pub rx_b: u64,
    /// Bytes sent (acknowledged by the peer)
    pub tx_b: u64,
    /// Connection lifespan in microseconds
    pub span_us: u64,
    /// Command name, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
    /// User ID of the closing context
    pub uid: u32,
    /// Padding for alignment
    pub _padding: [u8; 4],
}

/// Completion record for an IPv6 connection
///
/// Both ports share one field, see [`pack_ports`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Event {
    /// Process ID (cached owner, or the closing context)
    pub pid: u32,
    /// Padding for alignment
    pub _padding0: [u8; 4],
    /// Local address (`in6_addr` bytes)
    pub saddr: [u8; 16],
    /// Remote address (`in6_addr` bytes)
    pub daddr: [u8; 16],
    /// `rport | (lport << 32)`
    pub ports: u64,
    /// Bytes received
    pub rx_b: u64,
    /// Bytes sent (acknowledged by the peer)
    pub tx_b: u64,
    /// Connection lifespan in microseconds
    pub span_us: u64,
    /// Command name, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
    /// User ID of the closing context
    pub uid: u32,
    /// Padding for alignment
    pub _padding1: [u8; 4],
}

/// A reconciled connection, tagged by address family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionRecord {
    V4(Ipv4Event),
    V6(Ipv6Event),
}

impl CompletionRecord {
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::V4(_) => AddressFamily::V4,
            Self::V6(_) => AddressFamily::V6,
        }
    }
}

/// Pack an IPv6 port pair into [`Ipv6Event::ports`]
///
/// The remote port occupies the low 32 bits and the local port the high
/// 32 bits. Anything decoding the field must use [`unpack_ports`].
#[inline(always)]
pub fn pack_ports(lport: u16, rport: u16) -> u64 {
    rport as u64 | ((lport as u64) << 32)
}

/// Split [`Ipv6Event::ports`] back into `(lport, rport)`
#[inline(always)]
pub fn unpack_ports(ports: u64) -> (u16, u16) {
    ((ports >> 32) as u16, ports as u16)
}

/// Byte offsets of the kernel socket fields read by the probe
///
/// Stored in a global of the eBPF object and patched by the loader, since
/// the layout of `struct sock` and `struct tcp_sock` depends on the kernel
/// build. Verify with `pahole -C sock_common` and `pahole -C tcp_sock`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockOffsets {
    pub skc_daddr: u32,
    pub skc_rcv_saddr: u32,
    pub skc_dport: u32,
    pub skc_num: u32,
    pub skc_family: u32,
    pub skc_v6_daddr: u32,
    pub skc_v6_rcv_saddr: u32,
    pub bytes_received: u32,
    pub bytes_acked: u32,
    /// Padding for alignment
    pub _padding: u32,
}

impl SockOffsets {
    /// Layout of a common x86_64 distribution kernel
    pub const DEFAULT: Self = Self {
        skc_daddr: 0,
        skc_rcv_saddr: 4,
        skc_dport: 12,
        skc_num: 14,
        skc_family: 16,
        skc_v6_daddr: 56,
        skc_v6_rcv_saddr: 72,
        bytes_received: 1480,
        bytes_acked: 1552,
        _padding: 0,
    };
}

impl Default for SockOffsets {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Trim the NUL padding off a kernel command name
pub fn comm_bytes(comm: &[u8; TASK_COMM_LEN]) -> &[u8] {
    let end = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    &comm[..end]
}

// Compile-time layout checks
// The daemon decodes these byte for byte, so sizes are pinned.
const _: () = {
    assert!(core::mem::size_of::<Ipv4Event>() == 64);
    assert!(core::mem::size_of::<Ipv6Event>() == 96);
    assert!(core::mem::size_of::<TaskIdentity>() == 20);
    assert!(core::mem::size_of::<SockOffsets>() % core::mem::align_of::<SockOffsets>() == 0);
};

// Implement Aya's Pod trait for userspace usage
#[cfg(feature = "userspace")]
mod userspace_impls {
    use super::*;

    // Pod trait implementations for perf buffers, maps and globals
    unsafe impl aya::Pod for SockHandle {}
    unsafe impl aya::Pod for TaskIdentity {}
    unsafe impl aya::Pod for Ipv4Event {}
    unsafe impl aya::Pod for Ipv6Event {}
    unsafe impl aya::Pod for SockOffsets {}
}
