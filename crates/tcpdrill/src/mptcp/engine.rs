//! The per-packet MPTCP option rewriter.
//!
//! [`MptcpEngine::process`] walks a packet's TCP options and, for each MPTCP
//! option, dispatches on the subtype nibble. Inbound packets (tool to
//! kernel) get their key, token, nonce, HMAC, and sequence fields filled in;
//! outbound packets (kernel to tool) have the kernel's values captured into
//! session state and mirrored into the script's expected packet so the
//! host's comparison can succeed.

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::packet::{Direction, Packet, TcpOptionRef};

use super::crypto;
use super::options::{
    DssDsn8, DssDsn8NoCs, DssHdr, MpCapable, MpCapableSyn, MpJoinAck, MpJoinSyn, MpJoinSynAck,
    MptcpSubtype, TCPOPT_MPTCP, dss_flags, optlen, subtype_of,
};
use super::session::{KeySlot, Session};
use super::subflow::{Subflow, SubflowTable};
use super::vars::VarStore;

/// MPTCP option-rewriting engine for one connection.
///
/// Owns the session keys, the subflow table, the variable binding store,
/// and the nonce generator. Packets of one session must be processed in
/// wire order; each [`MptcpEngine::process`] call is atomic with respect to
/// the session, and state mutated by an earlier option in a packet is
/// visible to later ones.
#[derive(Debug)]
pub struct MptcpEngine {
    session: Session,
    subflows: SubflowTable,
    vars: VarStore,
    rng: StdRng,
}

impl Default for MptcpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MptcpEngine {
    /// Engine with an OS-entropy-seeded nonce generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Engine with a deterministic nonce generator, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            session: Session::new(),
            subflows: SubflowTable::new(),
            vars: VarStore::new(),
            rng,
        }
    }

    /// Queue a script variable name awaiting a key value.
    ///
    /// Called by the parser for each `<name>` token in a key position.
    pub fn enqueue_var(&mut self, name: &str) -> Result<()> {
        self.vars.enqueue(name)
    }

    /// Bind a name to a key value the script declared literally.
    pub fn declare_script_key(&mut self, name: &str, key: u64) {
        self.vars.bind_script_key(name, key);
    }

    /// Bind a name to raw bytes the script declared literally.
    pub fn declare_script_value(&mut self, name: &str, value: &[u8]) {
        self.vars.bind_script_value(name, value);
    }

    /// The session's key state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The session's subflows.
    pub fn subflows(&self) -> &SubflowTable {
        &self.subflows
    }

    /// The variable binding store.
    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    /// Rewrite every MPTCP option in `pkt`.
    ///
    /// For outbound packets `live` is the captured kernel packet; for
    /// inbound packets the script packet is the live packet and `live` is
    /// `None`. The first failing option aborts the packet; state already
    /// mutated by earlier options stays mutated.
    pub fn process(
        &mut self,
        pkt: &mut Packet,
        live: Option<&Packet>,
        direction: Direction,
    ) -> Result<()> {
        let opts: Vec<TcpOptionRef> = pkt
            .tcp_options()
            .filter(|opt| opt.kind == TCPOPT_MPTCP)
            .collect();

        for opt in opts {
            match subtype_of(pkt.option_bytes(opt))? {
                MptcpSubtype::Capable => self.rewrite_mp_capable(pkt, live, opt, direction)?,
                MptcpSubtype::Join => self.rewrite_mp_join(pkt, live, opt, direction)?,
                MptcpSubtype::Dss => self.rewrite_dss(pkt, opt, direction)?,
            }
        }
        Ok(())
    }

    /// Ensure the local key exists before an MP_CAPABLE write.
    ///
    /// A script-defined value for the front pending name wins; otherwise a
    /// key is drawn once and the name bound to the session's local slot.
    /// Calling this again never changes an established key.
    fn gen_local_key_if_unset(&mut self) -> Result<()> {
        let name = self.vars.peek().ok_or(Error::NoPendingVar)?.to_owned();

        if let Some(binding) = self.vars.lookup(&name) {
            if binding.subtype == MptcpSubtype::Capable && binding.is_script_defined() {
                let key = binding.resolve_key(&name, &self.session)?;
                self.session.set_local_key(key);
            }
        }

        if self.session.local_key().is_none() {
            let key = self.rng.gen::<u64>();
            self.session.set_local_key(key);
            self.vars.bind_key_ref(&name, KeySlot::Local);
            debug!("generated local key {key:#018x} for <{name}>");
        }
        Ok(())
    }

    /// Adopt the kernel's key from a live MP_CAPABLE option.
    ///
    /// A script-defined value for the front pending name declares what the
    /// kernel is expected to send and wins over the observed bytes.
    fn extract_peer_key(&mut self, live: &Packet) -> Result<()> {
        let live_opt = live
            .find_tcp_option(TCPOPT_MPTCP)
            .ok_or(Error::MissingMptcpOption)?;

        if let Some(name) = self.vars.peek().map(str::to_owned) {
            if let Some(binding) = self.vars.lookup(&name) {
                if binding.subtype == MptcpSubtype::Capable && binding.is_script_defined() {
                    let key = binding.resolve_key(&name, &self.session)?;
                    self.session.set_peer_key(key);
                }
            }
        }

        if self.session.peer_key().is_none() {
            let key = view::<MpCapableSyn>(live.option_bytes(live_opt), "MP_CAPABLE option")?
                .key
                .get();
            self.session.set_peer_key(key);
            let name = self.vars.peek().ok_or(Error::NoPendingVar)?.to_owned();
            self.vars.bind_key_ref(&name, KeySlot::Peer);
            debug!("captured peer key {key:#018x} for <{name}>");
        }
        Ok(())
    }

    /// Open a subflow the tool initiates.
    fn new_inbound_subflow(&mut self, pkt: &Packet) -> &mut Subflow {
        let local_rand = self.rng.gen::<u32>();
        let addr_id = self.session.alloc_local_addr_id();
        debug!(
            "new inbound subflow {}:{} -> {}:{}, addr id {addr_id}",
            pkt.src_addr(),
            pkt.tcp().src_port.get(),
            pkt.dst_addr(),
            pkt.tcp().dst_port.get(),
        );
        self.subflows
            .insert(Subflow::from_inbound(pkt, local_rand, addr_id))
    }

    /// Open a subflow the kernel initiates, absorbing the MP_JOIN SYN
    /// fields when the live packet carries them.
    fn new_outbound_subflow(&mut self, pkt: &Packet) -> &mut Subflow {
        let mut subflow = Subflow::from_outbound(pkt);
        if let Some(opt) = pkt.find_tcp_option(TCPOPT_MPTCP) {
            let bytes = pkt.option_bytes(opt);
            if matches!(subtype_of(bytes), Ok(MptcpSubtype::Join)) && bytes.len() == optlen::MP_JOIN_SYN
            {
                if let Ok(join) = view::<MpJoinSyn>(bytes, "MP_JOIN SYN option") {
                    subflow.peer_addr_id = join.address_id;
                    subflow.peer_rand = join.sender_random.get();
                }
            }
        }
        debug!(
            "new outbound subflow {}:{} -> {}:{}, peer addr id {}",
            subflow.src_ip, subflow.src_port, subflow.dst_ip, subflow.dst_port, subflow.peer_addr_id,
        );
        self.subflows.insert(subflow)
    }

    /// MP_CAPABLE: key generation, capture, and insertion.
    fn rewrite_mp_capable(
        &mut self,
        pkt: &mut Packet,
        live: Option<&Packet>,
        opt: TcpOptionRef,
        direction: Direction,
    ) -> Result<()> {
        let syn = pkt.tcp().syn();
        let ack = pkt.tcp().ack();

        match (opt.len, syn, direction) {
            // SYN and the synthesized SYN/ACK both carry the local key.
            (optlen::MP_CAPABLE_SYN, true, Direction::Inbound) => {
                self.gen_local_key_if_unset()?;
                let key = self.vars.consume_next_key(&self.session)?;
                view_mut::<MpCapableSyn>(pkt.option_bytes_mut(opt), "MP_CAPABLE option")?
                    .key
                    .set(key);
            }
            // The kernel's SYN or SYN/ACK announces its key.
            (optlen::MP_CAPABLE_SYN, true, Direction::Outbound) => {
                let live = live.ok_or(Error::MissingLivePacket)?;
                self.extract_peer_key(live)?;
                let key = self.vars.consume_next_key(&self.session)?;
                view_mut::<MpCapableSyn>(pkt.option_bytes_mut(opt), "MP_CAPABLE option")?
                    .key
                    .set(key);
            }
            // Final ACK of the handshake: both keys, then the connection's
            // derived state and its first subflow come to life.
            (optlen::MP_CAPABLE, false, _) if ack => {
                let sender_key = self.vars.consume_next_key(&self.session)?;
                let receiver_key = self.vars.consume_next_key(&self.session)?;
                {
                    let o = view_mut::<MpCapable>(pkt.option_bytes_mut(opt), "MP_CAPABLE option")?;
                    o.sender_key.set(sender_key);
                    o.receiver_key.set(receiver_key);
                }
                self.session.derive_initial_seqs()?;
                match direction {
                    Direction::Inbound => self.new_inbound_subflow(pkt),
                    Direction::Outbound => self.new_outbound_subflow(pkt),
                };
            }
            _ => {
                return Err(Error::UnexpectedOption {
                    subtype: MptcpSubtype::Capable,
                    length: opt.len as u8,
                    direction,
                });
            }
        }
        Ok(())
    }

    /// MP_JOIN: subflow creation and HMAC authentication.
    fn rewrite_mp_join(
        &mut self,
        pkt: &mut Packet,
        live: Option<&Packet>,
        opt: TcpOptionRef,
        direction: Direction,
    ) -> Result<()> {
        let syn = pkt.tcp().syn();
        let ack = pkt.tcp().ack();

        match (direction, syn, ack, opt.len) {
            // Tool opens a subflow: advertise the session token, a fresh
            // nonce, and the next address id.
            (Direction::Inbound, true, false, optlen::MP_JOIN_SYN) => {
                let token = crypto::token32(self.session.require_peer_key()?);
                let (local_rand, addr_id) = {
                    let subflow = self.new_inbound_subflow(pkt);
                    (subflow.local_rand, subflow.local_addr_id)
                };
                let o = view_mut::<MpJoinSyn>(pkt.option_bytes_mut(opt), "MP_JOIN SYN option")?;
                o.receiver_token.set(token);
                o.sender_random.set(local_rand);
                o.address_id = addr_id;
            }
            // Kernel answers the tool's join: absorb its nonce and address
            // id, synthesize the truncated HMAC it must have sent.
            (Direction::Outbound, true, true, optlen::MP_JOIN_SYN_ACK) => {
                let live = live.ok_or(Error::MissingLivePacket)?;
                let live_opt = live
                    .find_tcp_option(TCPOPT_MPTCP)
                    .ok_or(Error::MissingMptcpOption)?;
                let (peer_addr_id, peer_rand) = {
                    let join = view::<MpJoinSynAck>(
                        live.option_bytes(live_opt),
                        "MP_JOIN SYN/ACK option",
                    )?;
                    (join.address_id, join.sender_random.get())
                };
                let local_key = self.session.require_local_key()?;
                let peer_key = self.session.require_peer_key()?;
                let local_rand = {
                    let subflow = self
                        .subflows
                        .find_outbound_mut(live)
                        .ok_or_else(|| no_subflow(live, Direction::Outbound))?;
                    subflow.peer_addr_id = peer_addr_id;
                    subflow.peer_rand = peer_rand;
                    subflow.local_rand
                };
                let hmac = crypto::hmac64(peer_key, local_key, peer_rand, local_rand);
                let o =
                    view_mut::<MpJoinSynAck>(pkt.option_bytes_mut(opt), "MP_JOIN SYN/ACK option")?;
                o.address_id = peer_addr_id;
                o.sender_random.set(peer_rand);
                o.sender_hmac.set(hmac);
            }
            // Tool completes its join with the full HMAC.
            (Direction::Inbound, false, true, optlen::MP_JOIN_ACK) => {
                let local_key = self.session.require_local_key()?;
                let peer_key = self.session.require_peer_key()?;
                let (local_rand, peer_rand) = {
                    let subflow = self
                        .subflows
                        .find_inbound(pkt)
                        .ok_or_else(|| no_subflow(pkt, Direction::Inbound))?;
                    (subflow.local_rand, subflow.peer_rand)
                };
                let tag = crypto::hmac160(local_key, peer_key, local_rand, peer_rand);
                view_mut::<MpJoinAck>(pkt.option_bytes_mut(opt), "MP_JOIN ACK option")?
                    .sender_hmac = tag;
            }
            // Kernel opens a subflow of its own.
            (Direction::Outbound, true, false, optlen::MP_JOIN_SYN) => {
                let live = live.ok_or(Error::MissingLivePacket)?;
                let token = crypto::token32(self.session.require_peer_key()?);
                let (peer_addr_id, peer_rand) = {
                    let subflow = self.new_outbound_subflow(live);
                    (subflow.peer_addr_id, subflow.peer_rand)
                };
                let o = view_mut::<MpJoinSyn>(pkt.option_bytes_mut(opt), "MP_JOIN SYN option")?;
                o.address_id = peer_addr_id;
                o.sender_random.set(peer_rand);
                o.receiver_token.set(token);
            }
            // Tool answers the kernel's join.
            (Direction::Inbound, true, true, optlen::MP_JOIN_SYN_ACK) => {
                let local_key = self.session.require_local_key()?;
                let peer_key = self.session.require_peer_key()?;
                let local_rand = self.rng.gen::<u32>();
                let addr_id = self.session.alloc_local_addr_id();
                let peer_rand = {
                    let subflow = self
                        .subflows
                        .find_inbound_mut(pkt)
                        .ok_or_else(|| no_subflow(pkt, Direction::Inbound))?;
                    subflow.local_rand = local_rand;
                    subflow.local_addr_id = addr_id;
                    subflow.peer_rand
                };
                let hmac = crypto::hmac64(local_key, peer_key, local_rand, peer_rand);
                let o =
                    view_mut::<MpJoinSynAck>(pkt.option_bytes_mut(opt), "MP_JOIN SYN/ACK option")?;
                o.address_id = addr_id;
                o.sender_random.set(local_rand);
                o.sender_hmac.set(hmac);
            }
            // Kernel completes its join; swapped key order.
            (Direction::Outbound, false, true, optlen::MP_JOIN_ACK) => {
                let local_key = self.session.require_local_key()?;
                let peer_key = self.session.require_peer_key()?;
                let (local_rand, peer_rand) = {
                    let subflow = self
                        .subflows
                        .find_outbound(pkt)
                        .ok_or_else(|| no_subflow(pkt, Direction::Outbound))?;
                    (subflow.local_rand, subflow.peer_rand)
                };
                let tag = crypto::hmac160(peer_key, local_key, peer_rand, local_rand);
                view_mut::<MpJoinAck>(pkt.option_bytes_mut(opt), "MP_JOIN ACK option")?
                    .sender_hmac = tag;
            }
            _ => {
                return Err(Error::UnexpectedOption {
                    subtype: MptcpSubtype::Join,
                    length: opt.len as u8,
                    direction,
                });
            }
        }
        Ok(())
    }

    /// DSS: data sequence numbers relative to the derived initial values.
    ///
    /// Outbound DSS options are left uninspected.
    fn rewrite_dss(&mut self, pkt: &mut Packet, opt: TcpOptionRef, direction: Direction) -> Result<()> {
        if direction == Direction::Outbound {
            return Ok(());
        }

        let (flags, dack_len) = {
            let hdr = view::<DssHdr>(pkt.option_bytes(opt), "DSS option")?;
            (hdr.flags, hdr.dack_len())
        };
        let unexpected = || Error::UnexpectedOption {
            subtype: MptcpSubtype::Dss,
            length: opt.len as u8,
            direction,
        };

        if flags & dss_flags::DACK != 0 {
            let initial_dack = self.session.initial_dack()?;
            let off = std::mem::size_of::<DssHdr>();
            let bytes = pkt.option_bytes_mut(opt);
            if dack_len == 8 {
                let raw = be64_at(bytes, off, "DSS data ACK")?;
                put_be64_at(bytes, off, initial_dack.wrapping_add(raw));
            } else {
                let raw = be32_at(bytes, off, "DSS data ACK")?;
                let dack = initial_dack.wrapping_add(u64::from(raw));
                put_be32_at(bytes, off, dack as u32);
            }
        }

        if flags & dss_flags::DSN != 0 {
            if flags & dss_flags::DSN8 == 0 {
                return Err(unexpected());
            }
            let hdr_len = std::mem::size_of::<DssHdr>();
            let has_checksum = if opt.len == hdr_len + dack_len + std::mem::size_of::<DssDsn8>() {
                true
            } else if opt.len == hdr_len + dack_len + std::mem::size_of::<DssDsn8NoCs>() {
                false
            } else {
                return Err(unexpected());
            };

            let payload_len = pkt.tcp_payload_len();
            let initial_dsn = self.session.initial_dsn()?;
            let ssn = {
                let subflow = self
                    .subflows
                    .find_inbound_mut(pkt)
                    .ok_or_else(|| no_subflow(pkt, Direction::Inbound))?;
                let ssn = subflow.subflow_seq;
                subflow.advance_seq(payload_len);
                ssn
            };
            trace!("dss mapping: ssn {ssn}, {payload_len} payload bytes");

            let dsn_off = hdr_len + dack_len;
            let dsn = {
                let bytes = pkt.option_bytes_mut(opt);
                let raw = be64_at(bytes, dsn_off, "DSS mapping")?;
                // The no-checksum variant addresses data relative to
                // IDSN+1; established scripts expect the checksum variant
                // unshifted.
                let shift = if has_checksum { 0 } else { 1 };
                let dsn = initial_dsn.wrapping_add(raw).wrapping_add(shift);
                put_be64_at(bytes, dsn_off, dsn);
                put_be32_at(bytes, dsn_off + 8, ssn);
                put_be16_at(bytes, dsn_off + 12, payload_len);
                if has_checksum {
                    put_be16_at(bytes, dsn_off + 14, 0);
                }
                dsn
            };

            if has_checksum {
                let mut pseudo = [0u8; 16];
                pseudo[..8].copy_from_slice(&dsn.to_be_bytes());
                pseudo[8..12].copy_from_slice(&ssn.to_be_bytes());
                pseudo[12..14].copy_from_slice(&payload_len.to_be_bytes());
                let mut ck = crate::packet::checksum::InternetChecksum::new();
                ck.push(&pseudo);
                ck.push(pkt.tcp_segment());
                let cs = ck.finish();
                put_be16_at(pkt.option_bytes_mut(opt), dsn_off + 14, cs);
            }
        }
        Ok(())
    }
}

/// State error naming the tool-perspective port pair that failed to match.
fn no_subflow(pkt: &Packet, direction: Direction) -> Error {
    let (src_port, dst_port) = match direction {
        Direction::Inbound => (pkt.tcp().src_port.get(), pkt.tcp().dst_port.get()),
        Direction::Outbound => (pkt.tcp().dst_port.get(), pkt.tcp().src_port.get()),
    };
    Error::NoMatchingSubflow { src_port, dst_port }
}

/// Typed immutable view at the front of an option's bytes.
fn view<'a, T>(bytes: &'a [u8], what: &'static str) -> Result<&'a T>
where
    T: FromBytes + KnownLayout + Immutable + Unaligned,
{
    T::ref_from_prefix(bytes)
        .map(|(r, _)| r)
        .map_err(|_| Error::Truncated {
            what,
            expected: std::mem::size_of::<T>(),
            actual: bytes.len(),
        })
}

/// Typed mutable view at the front of an option's bytes.
fn view_mut<'a, T>(bytes: &'a mut [u8], what: &'static str) -> Result<&'a mut T>
where
    T: FromBytes + IntoBytes + KnownLayout + Unaligned,
{
    let actual = bytes.len();
    T::mut_from_prefix(bytes)
        .map(|(r, _)| r)
        .map_err(|_| Error::Truncated {
            what,
            expected: std::mem::size_of::<T>(),
            actual,
        })
}

fn be64_at(bytes: &[u8], off: usize, what: &'static str) -> Result<u64> {
    bytes
        .get(off..off + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or(Error::Truncated {
            what,
            expected: off + 8,
            actual: bytes.len(),
        })
}

fn be32_at(bytes: &[u8], off: usize, what: &'static str) -> Result<u32> {
    bytes
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(Error::Truncated {
            what,
            expected: off + 4,
            actual: bytes.len(),
        })
}

fn put_be64_at(bytes: &mut [u8], off: usize, value: u64) {
    bytes[off..off + 8].copy_from_slice(&value.to_be_bytes());
}

fn put_be32_at(bytes: &mut [u8], off: usize, value: u32) {
    bytes[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_be16_at(bytes: &mut [u8], off: usize, value: u16) {
    bytes[off..off + 2].copy_from_slice(&value.to_be_bytes());
}
