//! Script variable bindings.
//!
//! The script parser cannot know the numeric value behind a `<name>` token
//! at parse time: keys are generated or sniffed while packets flow. It
//! enqueues each name into a FIFO, and the first option that needs a key
//! drains a name and binds it. Duplicate occurrences of a name resolve
//! through lookup rather than re-binding.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

use super::options::MptcpSubtype;
use super::session::{KeySlot, Session};

/// Default bound on names queued ahead of their packets.
pub const MAX_PENDING_VARS: usize = 32;

/// Where a binding's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSource {
    /// The script declared the value literally.
    Script,
    /// The engine generated or observed the value.
    Engine,
}

/// A binding's value.
///
/// Engine bindings reference a session key slot instead of copying it, so a
/// key observed after binding still resolves; dereferencing always goes
/// through the session.
#[derive(Debug, Clone)]
pub enum VarValue {
    /// Bytes owned by the store, as declared by the script.
    Owned(Vec<u8>),
    /// Reference to one of the session's key slots.
    SessionKeyRef(KeySlot),
}

/// A resolved script variable.
#[derive(Debug, Clone)]
pub struct VarBinding {
    /// Which option family the value belongs to.
    pub subtype: MptcpSubtype,
    /// Script-declared or engine-made.
    pub source: VarSource,
    /// The value or a session reference to it.
    pub value: VarValue,
}

impl VarBinding {
    /// Whether the script declared this value literally.
    pub fn is_script_defined(&self) -> bool {
        self.source == VarSource::Script
    }

    /// Resolve this binding as a 64-bit key.
    pub fn resolve_key(&self, name: &str, session: &Session) -> Result<u64> {
        if self.subtype != MptcpSubtype::Capable {
            return Err(Error::NotAKey { name: name.into() });
        }
        match &self.value {
            VarValue::Owned(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| Error::BadKeyLength {
                    name: name.into(),
                    actual: bytes.len(),
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            VarValue::SessionKeyRef(slot) => session.key(*slot).ok_or(Error::KeyNotSet {
                which: match slot {
                    KeySlot::Local => "local",
                    KeySlot::Peer => "peer",
                },
            }),
        }
    }
}

/// FIFO of pending names plus the name-to-binding map.
#[derive(Debug)]
pub struct VarStore {
    pending: VecDeque<String>,
    bound: HashMap<String, VarBinding>,
    capacity: usize,
}

impl Default for VarStore {
    fn default() -> Self {
        Self::with_capacity(MAX_PENDING_VARS)
    }
}

impl VarStore {
    /// Store with the default pending-queue bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with an explicit pending-queue bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            bound: HashMap::new(),
            capacity,
        }
    }

    /// Queue a name awaiting resolution.
    pub fn enqueue(&mut self, name: &str) -> Result<()> {
        if self.pending.len() >= self.capacity {
            return Err(Error::PendingQueueFull {
                capacity: self.capacity,
            });
        }
        self.pending.push_back(name.to_owned());
        Ok(())
    }

    /// The front pending name, without removing it.
    pub fn peek(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    /// Dequeue the front pending name.
    pub fn pop(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Number of names still pending.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bind a name to one of the session's key slots.
    pub fn bind_key_ref(&mut self, name: &str, slot: KeySlot) {
        self.bound.insert(
            name.to_owned(),
            VarBinding {
                subtype: MptcpSubtype::Capable,
                source: VarSource::Engine,
                value: VarValue::SessionKeyRef(slot),
            },
        );
    }

    /// Bind a name to bytes the script declared.
    pub fn bind_script_value(&mut self, name: &str, value: &[u8]) {
        self.bound.insert(
            name.to_owned(),
            VarBinding {
                subtype: MptcpSubtype::Capable,
                source: VarSource::Script,
                value: VarValue::Owned(value.to_vec()),
            },
        );
    }

    /// Bind a name to a script-declared 64-bit key.
    pub fn bind_script_key(&mut self, name: &str, key: u64) {
        self.bind_script_value(name, &key.to_be_bytes());
    }

    /// Exact-match lookup.
    pub fn lookup(&self, name: &str) -> Option<&VarBinding> {
        self.bound.get(name)
    }

    /// Dequeue the next name and resolve it as a key.
    pub fn consume_next_key(&mut self, session: &Session) -> Result<u64> {
        let name = self.pop().ok_or(Error::NoPendingVar)?;
        let binding = self.lookup(&name).ok_or_else(|| Error::UnboundVar {
            name: name.clone(),
        })?;
        binding.resolve_key(&name, session)
    }
}
