//! Socket structure access
//!
//! Reads the addressing fields of `struct sock_common` and the byte
//! counters of `struct tcp_sock`. Field offsets come from the
//! `SOCK_OFFSETS` global, which the loader patches for the running kernel.

use aya_ebpf::{
    cty::c_void,
    helpers::bpf_probe_read_kernel,
    programs::ProbeContext,
};
use tcplife_common::{ByteCounters, Ipv4Endpoints, Ipv6Endpoints, SockHandle, SockOffsets};

/// Offsets of the socket fields we read
///
/// Overwritten at load time through `BpfLoader::set_global`.
#[no_mangle]
static SOCK_OFFSETS: SockOffsets = SockOffsets::DEFAULT;

#[inline(always)]
fn offsets() -> SockOffsets {
    // Volatile so the compiler keeps the load instead of folding the default
    unsafe { core::ptr::read_volatile(&SOCK_OFFSETS) }
}

/// Extract socket pointer from kprobe context
///
/// The first argument to tcp_set_state is a pointer to struct sock.
#[inline(always)]
pub fn get_sock_from_context(ctx: &ProbeContext) -> Result<*const c_void, i64> {
    let sk: *const c_void = ctx.arg(0).ok_or(-1i64)?;
    if sk.is_null() {
        return Err(-1);
    }
    Ok(sk)
}

/// Extract the new state from kprobe context
#[inline(always)]
pub fn get_state_from_context(ctx: &ProbeContext) -> Result<u32, i64> {
    ctx.arg::<u32>(1).ok_or(-1)
}

/// Read a field at `offset` bytes into the socket
///
/// A failed read yields the default value; the record is best-effort.
#[inline(always)]
fn read_field<T: Copy + Default>(handle: SockHandle, offset: u32) -> T {
    let ptr = (handle.0 as usize + offset as usize) as *const T;
    unsafe { bpf_probe_read_kernel(ptr).unwrap_or_default() }
}

/// Address family (AF_INET, AF_INET6, ...)
#[inline(always)]
pub fn read_family(handle: SockHandle) -> u16 {
    read_field::<u16>(handle, offsets().skc_family)
}

/// Bytes received and bytes acknowledged by the peer, as in tcp_get_info()
#[inline(always)]
pub fn read_byte_counters(handle: SockHandle) -> ByteCounters {
    let off = offsets();
    ByteCounters {
        rx: read_field::<u64>(handle, off.bytes_received),
        tx: read_field::<u64>(handle, off.bytes_acked),
    }
}

/// IPv4 addresses (network byte order) and ports (host byte order)
#[inline(always)]
pub fn read_ipv4_endpoints(handle: SockHandle) -> Ipv4Endpoints {
    let off = offsets();
    Ipv4Endpoints {
        saddr: read_field::<u32>(handle, off.skc_rcv_saddr),
        daddr: read_field::<u32>(handle, off.skc_daddr),
        lport: read_field::<u16>(handle, off.skc_num),
        // skc_dport is stored in network byte order
        rport: u16::from_be(read_field::<u16>(handle, off.skc_dport)),
    }
}

/// IPv6 addresses (raw in6_addr bytes) and ports (host byte order)
#[inline(always)]
pub fn read_ipv6_endpoints(handle: SockHandle) -> Ipv6Endpoints {
    let off = offsets();
    Ipv6Endpoints {
        saddr: read_field::<[u8; 16]>(handle, off.skc_v6_rcv_saddr),
        daddr: read_field::<[u8; 16]>(handle, off.skc_v6_daddr),
        lport: read_field::<u16>(handle, off.skc_num),
        rport: u16::from_be(read_field::<u16>(handle, off.skc_dport)),
    }
}
