//! Shared constants for the tcplife probe
//!
//! These constants are used by both kernel and userspace programs
//! to ensure consistency in behavior and limits.

// ============================================================================
// BPF Map Sizes
// ============================================================================

/// Maximum number of concurrent connections tracked by each correlation table
///
/// Inserting a new handle into a full table fails and the insert is dropped.
pub const MAX_CONNECTIONS: u32 = 10240;

/// Length of a kernel task command name, including the trailing NUL
pub const TASK_COMM_LEN: usize = 16;

// ============================================================================
// TCP States (from include/net/tcp_states.h)
// ============================================================================

pub const TCP_ESTABLISHED: u32 = 1;
pub const TCP_SYN_SENT: u32 = 2;
pub const TCP_SYN_RECV: u32 = 3;
pub const TCP_FIN_WAIT1: u32 = 4;
pub const TCP_FIN_WAIT2: u32 = 5;
pub const TCP_TIME_WAIT: u32 = 6;
pub const TCP_CLOSE: u32 = 7;
pub const TCP_CLOSE_WAIT: u32 = 8;
pub const TCP_LAST_ACK: u32 = 9;
pub const TCP_LISTEN: u32 = 10;
pub const TCP_CLOSING: u32 = 11;
pub const TCP_NEW_SYN_RECV: u32 = 12;

// ============================================================================
// Address Families (from linux/socket.h)
// ============================================================================

/// IPv4 address family
pub const AF_INET: u16 = 2;

/// IPv6 address family
pub const AF_INET6: u16 = 10;

// ============================================================================
// Statistics Counter Indices (for STATS map)
// ============================================================================

/// Number of tcp_set_state invocations seen
pub const STAT_STATE_TRANSITIONS: u32 = 0;

/// Number of birth timestamps written (including re-stamps)
pub const STAT_BIRTHS_STAMPED: u32 = 1;

/// Number of owner identities cached
pub const STAT_IDENTITIES_CAPTURED: u32 = 2;

/// Number of terminal events with no birth record
pub const STAT_MISSED_CREATION: u32 = 3;

/// Number of birth inserts rejected by a full table
pub const STAT_BIRTH_OVERFLOW: u32 = 4;

/// Number of identity inserts rejected by a full table
pub const STAT_IDENTITY_OVERFLOW: u32 = 5;

/// Number of records attributed to the context running the close
pub const STAT_IDENTITY_FALLBACK: u32 = 6;

/// Number of IPv4 records emitted
pub const STAT_EMITTED_V4: u32 = 7;

/// Number of IPv6 records emitted
pub const STAT_EMITTED_V6: u32 = 8;

/// Number of terminal events on sockets of another family
pub const STAT_UNKNOWN_FAMILY: u32 = 9;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 10;

/// Counter names in index order, for reporting
pub const STAT_NAMES: [&str; MAX_STATS as usize] = [
    "state_transitions",
    "births_stamped",
    "identities_captured",
    "missed_creation",
    "birth_overflow",
    "identity_overflow",
    "identity_fallback",
    "emitted_v4",
    "emitted_v6",
    "unknown_family",
];
