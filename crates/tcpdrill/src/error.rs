//! Error types for packet access and MPTCP option rewriting.

use crate::mptcp::options::MptcpSubtype;
use crate::packet::Direction;

/// Result type for packet and MPTCP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rewriting a packet.
///
/// Variants group into three kinds the host tool maps to its per-packet
/// verdict: option errors (the packet or an option in it is malformed or
/// unexpected), state errors (a precondition on accumulated connection state
/// failed), and resource errors. See the `is_*` predicates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header or option was shorter than its layout requires.
    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// What was being read.
        what: &'static str,
        /// Bytes the layout requires.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The IP version nibble is neither 4 nor 6.
    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),

    /// The IP payload is not TCP.
    #[error("not a TCP packet (IP protocol {protocol})")]
    NotTcp {
        /// The IP protocol / next-header value found.
        protocol: u8,
    },

    /// An MPTCP option does not fit the packet's flags, direction, and
    /// declared length.
    #[error("unexpected {subtype} option (length {length}, {direction})")]
    UnexpectedOption {
        /// The option subtype.
        subtype: MptcpSubtype,
        /// The option's declared length.
        length: u8,
        /// The packet direction being processed.
        direction: Direction,
    },

    /// An MPTCP option carries a subtype this engine does not handle.
    #[error("unhandled MPTCP option subtype {0}")]
    UnknownSubtype(u8),

    /// A live packet was expected to carry an MPTCP option but does not.
    #[error("live packet carries no MPTCP option")]
    MissingMptcpOption,

    /// Outbound processing needs the captured kernel packet.
    #[error("no live packet supplied for outbound processing")]
    MissingLivePacket,

    /// An option needed a queued variable name but none was pending.
    #[error("no pending variable name for this option")]
    NoPendingVar,

    /// A dequeued variable name has no binding.
    #[error("variable <{name}> is not bound to a value")]
    UnboundVar {
        /// The unresolvable name.
        name: String,
    },

    /// A binding exists but is not of the subtype the option requires.
    #[error("variable <{name}> is not bound to a key")]
    NotAKey {
        /// The offending name.
        name: String,
    },

    /// A script-defined key value has the wrong width.
    #[error("script value for <{name}> is {actual} bytes, keys are 8")]
    BadKeyLength {
        /// The offending name.
        name: String,
        /// Bytes the script supplied.
        actual: usize,
    },

    /// A session key was consulted before it was generated or observed.
    #[error("{which} key not known yet")]
    KeyNotSet {
        /// Which key slot was empty ("local" or "peer").
        which: &'static str,
    },

    /// `initial_dsn` / `initial_dack` consulted before the handshake
    /// completed.
    #[error("initial data sequence numbers not derived yet")]
    SeqsNotDerived,

    /// No subflow matches the packet's port pair.
    #[error("no subflow matches ports {src_port} -> {dst_port}")]
    NoMatchingSubflow {
        /// Tool-side source port searched for.
        src_port: u16,
        /// Tool-side destination port searched for.
        dst_port: u16,
    },

    /// The pending-variable queue is at capacity.
    #[error("pending variable queue full (capacity {capacity})")]
    PendingQueueFull {
        /// The queue's fixed capacity.
        capacity: usize,
    },
}

impl Error {
    /// Malformed or unexpected packet bytes for the current packet.
    pub fn is_option_error(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::UnsupportedIpVersion(_)
                | Self::NotTcp { .. }
                | Self::UnexpectedOption { .. }
                | Self::UnknownSubtype(_)
                | Self::MissingMptcpOption
        )
    }

    /// A precondition on accumulated session state failed.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::MissingLivePacket
                | Self::NoPendingVar
                | Self::UnboundVar { .. }
                | Self::NotAKey { .. }
                | Self::BadKeyLength { .. }
                | Self::KeyNotSet { .. }
                | Self::SeqsNotDerived
                | Self::NoMatchingSubflow { .. }
        )
    }

    /// A queue or allocation limit was hit.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::PendingQueueFull { .. })
    }
}
