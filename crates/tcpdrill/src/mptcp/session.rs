//! Per-connection MPTCP session state.

use crate::error::{Error, Result};

use super::crypto;

/// Which session key slot a binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    /// The key this tool generated.
    Local,
    /// The key observed from the kernel.
    Peer,
}

/// The pair of 64-bit session keys and everything derived from them.
///
/// Keys are write-once: the setters are no-ops when the slot is already
/// filled, which is what lets a script-defined value claim a slot before
/// the generated or observed fallback runs.
#[derive(Debug, Default)]
pub struct Session {
    local_key: Option<u64>,
    peer_key: Option<u64>,
    initial_dsn: Option<u64>,
    initial_dack: Option<u64>,
    next_local_addr_id: u8,
}

impl Session {
    /// Fresh session with no keys known.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tool-side key. No-op if already set.
    pub fn set_local_key(&mut self, key: u64) {
        self.local_key.get_or_insert(key);
    }

    /// Record the kernel-side key. No-op if already set.
    pub fn set_peer_key(&mut self, key: u64) {
        self.peer_key.get_or_insert(key);
    }

    /// The tool-side key, if known.
    pub fn local_key(&self) -> Option<u64> {
        self.local_key
    }

    /// The kernel-side key, if known.
    pub fn peer_key(&self) -> Option<u64> {
        self.peer_key
    }

    /// Read a key slot.
    pub fn key(&self, slot: KeySlot) -> Option<u64> {
        match slot {
            KeySlot::Local => self.local_key,
            KeySlot::Peer => self.peer_key,
        }
    }

    /// The tool-side key, or a state error when not known yet.
    pub fn require_local_key(&self) -> Result<u64> {
        self.local_key.ok_or(Error::KeyNotSet { which: "local" })
    }

    /// The kernel-side key, or a state error when not known yet.
    pub fn require_peer_key(&self) -> Result<u64> {
        self.peer_key.ok_or(Error::KeyNotSet { which: "peer" })
    }

    /// Derive the initial DSN and DACK from the keys.
    ///
    /// Called at the final ACK of the initial handshake, once both keys are
    /// known. No-op when already derived.
    pub fn derive_initial_seqs(&mut self) -> Result<()> {
        let local = self.require_local_key()?;
        let peer = self.require_peer_key()?;
        self.initial_dsn.get_or_insert_with(|| crypto::idsn64(local));
        self.initial_dack.get_or_insert_with(|| crypto::idsn64(peer));
        Ok(())
    }

    /// The initial data sequence number for data this tool sends.
    pub fn initial_dsn(&self) -> Result<u64> {
        self.initial_dsn.ok_or(Error::SeqsNotDerived)
    }

    /// The initial data ACK, from the kernel's key.
    pub fn initial_dack(&self) -> Result<u64> {
        self.initial_dack.ok_or(Error::SeqsNotDerived)
    }

    /// Hand out the next tool-side address ID.
    pub fn alloc_local_addr_id(&mut self) -> u8 {
        let id = self.next_local_addr_id;
        self.next_local_addr_id = self.next_local_addr_id.wrapping_add(1);
        id
    }
}
