//! MPTCP option rewriting for scripted TCP kernel tests.
//!
//! A test script describes an exchange of TCP packets between this tool and a
//! live kernel. Packets carrying Multipath TCP options (RFC 6824) contain
//! fields that cannot be written literally in the script: 64-bit session
//! keys, SHA-1 derived tokens, per-subflow nonces, HMAC-SHA1 authenticators,
//! and data sequence numbers that grow with the connection. This crate fills
//! those fields in for packets the tool injects, and captures them from
//! packets the kernel sends.
//!
//! # Example
//!
//! ```ignore
//! use tcpdrill::mptcp::{Direction, MptcpEngine};
//! use tcpdrill::packet::Packet;
//!
//! let mut engine = MptcpEngine::new();
//!
//! // The script parser queues a name for each `<var>` token it sees where
//! // a key is expected, then the engine resolves it per packet.
//! engine.enqueue_var("c")?;
//!
//! let mut pkt = Packet::from_bytes(syn_frame)?;
//! engine.process(&mut pkt, None, Direction::Inbound)?;
//! ```

pub mod mptcp;
pub mod packet;

mod error;

// Re-export common types at crate root for convenience
pub use error::{Error, Result};
pub use mptcp::MptcpEngine;
pub use packet::{Direction, Packet};
