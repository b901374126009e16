//! TCP state classification
//!
//! Maps the `state` argument of `tcp_set_state()` onto the actions the
//! reconciler takes for it.

use crate::constants::*;

/// TCP protocol states, numbered as in the kernel
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Established = TCP_ESTABLISHED,
    SynSent = TCP_SYN_SENT,
    SynRecv = TCP_SYN_RECV,
    FinWait1 = TCP_FIN_WAIT1,
    FinWait2 = TCP_FIN_WAIT2,
    TimeWait = TCP_TIME_WAIT,
    Close = TCP_CLOSE,
    CloseWait = TCP_CLOSE_WAIT,
    LastAck = TCP_LAST_ACK,
    Listen = TCP_LISTEN,
    Closing = TCP_CLOSING,
    NewSynRecv = TCP_NEW_SYN_RECV,
}

impl TcpState {
    pub fn from_raw(state: u32) -> Option<Self> {
        let state = match state {
            TCP_ESTABLISHED => Self::Established,
            TCP_SYN_SENT => Self::SynSent,
            TCP_SYN_RECV => Self::SynRecv,
            TCP_FIN_WAIT1 => Self::FinWait1,
            TCP_FIN_WAIT2 => Self::FinWait2,
            TCP_TIME_WAIT => Self::TimeWait,
            TCP_CLOSE => Self::Close,
            TCP_CLOSE_WAIT => Self::CloseWait,
            TCP_LAST_ACK => Self::LastAck,
            TCP_LISTEN => Self::Listen,
            TCP_CLOSING => Self::Closing,
            TCP_NEW_SYN_RECV => Self::NewSynRecv,
            _ => return None,
        };
        Some(state)
    }

    /// Kernel name of the state, as printed by `ss`
    pub fn name(self) -> &'static str {
        match self {
            Self::Established => "ESTABLISHED",
            Self::SynSent => "SYN_SENT",
            Self::SynRecv => "SYN_RECV",
            Self::FinWait1 => "FIN_WAIT1",
            Self::FinWait2 => "FIN_WAIT2",
            Self::TimeWait => "TIME_WAIT",
            Self::Close => "CLOSE",
            Self::CloseWait => "CLOSE_WAIT",
            Self::LastAck => "LAST_ACK",
            Self::Listen => "LISTEN",
            Self::Closing => "CLOSING",
            Self::NewSynRecv => "NEW_SYN_RECV",
        }
    }
}

/// What a state transition means for the correlation tables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateClass {
    /// Before the close handshake: (re)stamp the birth time.
    ///
    /// `owner_context` is set for SYN_SENT, which is also the point where an
    /// outbound connection's owner is on CPU.
    Early { owner_context: bool },
    /// LAST_ACK: the local side finishes closing after the peer closed,
    /// from the owner's context.
    IdentityCapture,
    /// CLOSE: reconcile and emit.
    Terminal,
    Other,
}

impl StateClass {
    #[inline(always)]
    pub fn stamps_birth(self) -> bool {
        matches!(self, Self::Early { .. })
    }

    #[inline(always)]
    pub fn captures_identity(self) -> bool {
        matches!(
            self,
            Self::Early {
                owner_context: true
            } | Self::IdentityCapture
        )
    }

    #[inline(always)]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal)
    }
}

/// Classify a raw `tcp_set_state()` state argument
///
/// Every state below FIN_WAIT1 counts as early, not just ESTABLISHED: a
/// code path reaching ESTABLISHED without going through `tcp_set_state()`
/// would otherwise leave the connection without a birth stamp.
#[inline(always)]
pub fn classify(state: u32) -> StateClass {
    match TcpState::from_raw(state) {
        Some(TcpState::SynSent) => StateClass::Early {
            owner_context: true,
        },
        Some(TcpState::Established | TcpState::SynRecv) => StateClass::Early {
            owner_context: false,
        },
        Some(TcpState::LastAck) => StateClass::IdentityCapture,
        Some(TcpState::Close) => StateClass::Terminal,
        _ => StateClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_states_precede_close_handshake() {
        for state in 0..=16u32 {
            let class = classify(state);
            let expected = (TCP_ESTABLISHED..TCP_FIN_WAIT1).contains(&state);
            assert_eq!(class.stamps_birth(), expected, "state {}", state);
        }
    }

    #[test]
    fn test_identity_capture_states() {
        let capturing: [u32; 2] = [TCP_SYN_SENT, TCP_LAST_ACK];
        for state in 0..=16u32 {
            assert_eq!(
                classify(state).captures_identity(),
                capturing.contains(&state),
                "state {}",
                state
            );
        }
    }

    #[test]
    fn test_syn_sent_is_early_and_capturing() {
        let class = classify(TCP_SYN_SENT);
        assert!(class.stamps_birth());
        assert!(class.captures_identity());
        assert!(!class.is_terminal());
    }

    #[test]
    fn test_only_close_is_terminal() {
        assert_eq!(classify(TCP_CLOSE), StateClass::Terminal);
        for state in [
            TCP_FIN_WAIT1,
            TCP_FIN_WAIT2,
            TCP_TIME_WAIT,
            TCP_CLOSE_WAIT,
            TCP_LISTEN,
            TCP_CLOSING,
            TCP_NEW_SYN_RECV,
        ] {
            assert_eq!(classify(state), StateClass::Other, "state {}", state);
        }
    }

    #[test]
    fn test_unknown_states_are_other() {
        assert_eq!(classify(0), StateClass::Other);
        assert_eq!(classify(13), StateClass::Other);
        assert_eq!(classify(u32::MAX), StateClass::Other);
        assert_eq!(TcpState::from_raw(0), None);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TcpState::from_raw(TCP_LAST_ACK).map(TcpState::name), Some("LAST_ACK"));
        assert_eq!(TcpState::Close as u32, TCP_CLOSE);
    }
}
