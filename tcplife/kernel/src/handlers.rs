//! Kprobe handler for TCP connection lifecycle tracking
//!
//! Attaches to `tcp_set_state` and feeds every transition through the
//! reconciler, which stamps, caches and finally emits one record per
//! connection.

use aya_ebpf::{macros::kprobe, programs::ProbeContext};
use tcplife_common::{
    constants::*, AddressFamily, IdentitySource, Reconciler, SockHandle, TableWrite, Transition,
};

use crate::{
    helpers::*,
    maps::*,
    socket_parser::*,
};

/// Track TCP state transitions
///
/// Attached to: tcp_set_state(struct sock *sk, int state)
///
/// The first argument is the socket whose state is about to change, the
/// second the state it changes to.
#[kprobe]
pub fn tcp_set_state(ctx: ProbeContext) -> u32 {
    match try_tcp_set_state(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

fn try_tcp_set_state(ctx: &ProbeContext) -> Result<u32, i64> {
    increment_stat(STAT_STATE_TRANSITIONS);

    let sk = get_sock_from_context(ctx)?;
    let state = get_state_from_context(ctx)?;

    let births = BpfTable::new(&BIRTH);
    let owners = BpfTable::new(&WHOAMI);
    let sink = PerfSink::new(ctx);

    let outcome = Reconciler::new(&births, &owners, &KernelEnv, &sink)
        .on_state_transition(SockHandle::from_ptr(sk), state);

    count_transition(outcome);

    Ok(0)
}

/// Translate a reconciler outcome into STATS counters
#[inline(always)]
fn count_transition(outcome: Transition) {
    match outcome {
        Transition::Ignored => {}
        Transition::Tracked { birth, identity } => {
            match birth {
                TableWrite::Stored => increment_stat(STAT_BIRTHS_STAMPED),
                TableWrite::Dropped => increment_stat(STAT_BIRTH_OVERFLOW),
                TableWrite::Skipped => {}
            }
            match identity {
                TableWrite::Stored => increment_stat(STAT_IDENTITIES_CAPTURED),
                TableWrite::Dropped => increment_stat(STAT_IDENTITY_OVERFLOW),
                TableWrite::Skipped => {}
            }
        }
        Transition::MissedCreation => increment_stat(STAT_MISSED_CREATION),
        Transition::UnknownFamily => increment_stat(STAT_UNKNOWN_FAMILY),
        Transition::Emitted { family, identity } => {
            match family {
                AddressFamily::V4 => increment_stat(STAT_EMITTED_V4),
                AddressFamily::V6 => increment_stat(STAT_EMITTED_V6),
            }
            if identity == IdentitySource::Fallback {
                increment_stat(STAT_IDENTITY_FALLBACK);
            }
        }
    }
}
