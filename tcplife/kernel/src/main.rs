//! eBPF tcplife probe - Kernel Space Program
//!
//! This eBPF program traces the lifecycle of TCP connections by attaching
//! to tcp_set_state. For every connection it sees being created, it emits
//! one record at close time carrying the owning process, the addresses and
//! ports, the byte counters and the connection's lifespan.
//!
//! ## Architecture
//!
//! ```text
//! tcp_set_state(sk, < FIN_WAIT1)      -> BIRTH[sk] = now
//! tcp_set_state(sk, SYN_SENT|LAST_ACK) -> WHOAMI[sk] = current task
//!                  |
//!                  v
//! tcp_set_state(sk, CLOSE) -> reconcile, send to IPV4_EVENTS / IPV6_EVENTS
//!                  |
//!                  v
//! Userspace    -> Read records, aggregate, export
//! ```
//!
//! Process attribution is best-effort: the pid and command name are cached
//! only where the owner is known to be on CPU, and otherwise taken from
//! whichever task runs the close.
//!
//! ## Usage
//!
//! This program must be compiled for the bpfel-unknown-none target:
//!
//! ```bash
//! cargo build --release --target=bpfel-unknown-none
//! ```
//!
//! The compiled bytecode is then loaded by the userspace program.

#![no_std]
#![no_main]

mod handlers;
mod helpers;
mod maps;
mod socket_parser;

// Re-export the kprobe so it is visible to the loader
pub use handlers::tcp_set_state;

// Re-export maps for verification
pub use maps::{BIRTH, IPV4_EVENTS, IPV6_EVENTS, STATS, WHOAMI};

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // eBPF programs cannot panic - this should never be reached
    // The verifier should catch any potential panics
    loop {}
}
