//! The per-session subflow table.
//!
//! Subflows are stored newest-first in an owned vector and matched by their
//! port pair; test sessions hold a handful of subflows, so every lookup is
//! a linear scan.

use std::net::IpAddr;

use crate::packet::Packet;

/// One TCP subflow of an MPTCP session.
///
/// The 4-tuple is kept from the tool's perspective: `src` is the tool side,
/// `dst` the kernel side, ports in host byte order.
#[derive(Debug, Clone)]
pub struct Subflow {
    /// Tool-side address.
    pub src_ip: IpAddr,
    /// Kernel-side address.
    pub dst_ip: IpAddr,
    /// Tool-side port.
    pub src_port: u16,
    /// Kernel-side port.
    pub dst_port: u16,
    /// Nonce this tool sent in the subflow's MP_JOIN handshake.
    pub local_rand: u32,
    /// Nonce the kernel sent.
    pub peer_rand: u32,
    /// Address ID this tool advertised.
    pub local_addr_id: u8,
    /// Address ID the kernel advertised.
    pub peer_addr_id: u8,
    /// Cumulative subflow-level payload bytes sent by the tool.
    pub subflow_seq: u32,
}

impl Subflow {
    /// Subflow opened by the tool: the packet's tuple is already
    /// tool-perspective.
    pub fn from_inbound(pkt: &Packet, local_rand: u32, local_addr_id: u8) -> Self {
        Self {
            src_ip: pkt.src_addr(),
            dst_ip: pkt.dst_addr(),
            src_port: pkt.tcp().src_port.get(),
            dst_port: pkt.tcp().dst_port.get(),
            local_rand,
            peer_rand: 0,
            local_addr_id,
            peer_addr_id: 0,
            subflow_seq: 0,
        }
    }

    /// Subflow opened by the kernel: the live packet's perspective is the
    /// kernel's, so the tuple swaps.
    pub fn from_outbound(pkt: &Packet) -> Self {
        Self {
            src_ip: pkt.dst_addr(),
            dst_ip: pkt.src_addr(),
            src_port: pkt.tcp().dst_port.get(),
            dst_port: pkt.tcp().src_port.get(),
            local_rand: 0,
            peer_rand: 0,
            local_addr_id: 0,
            peer_addr_id: 0,
            subflow_seq: 0,
        }
    }

    /// Whether an inbound (tool-perspective) packet belongs to this subflow.
    pub fn matches_inbound(&self, pkt: &Packet) -> bool {
        self.src_port == pkt.tcp().src_port.get() && self.dst_port == pkt.tcp().dst_port.get()
    }

    /// Whether an outbound (kernel-perspective) packet belongs to this
    /// subflow.
    pub fn matches_outbound(&self, pkt: &Packet) -> bool {
        self.src_port == pkt.tcp().dst_port.get() && self.dst_port == pkt.tcp().src_port.get()
    }

    /// Grow the subflow-level sequence by one packet's payload.
    pub fn advance_seq(&mut self, payload_len: u16) {
        self.subflow_seq = self.subflow_seq.wrapping_add(u32::from(payload_len));
    }
}

/// All subflows of one session.
#[derive(Debug, Default)]
pub struct SubflowTable {
    flows: Vec<Subflow>,
}

impl SubflowTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subflows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether no subflow exists yet.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Iterate subflows, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Subflow> {
        self.flows.iter()
    }

    /// Add a subflow in front of the existing ones and return it.
    pub fn insert(&mut self, subflow: Subflow) -> &mut Subflow {
        self.flows.insert(0, subflow);
        &mut self.flows[0]
    }

    /// First subflow matching an inbound packet's tuple.
    pub fn find_inbound(&self, pkt: &Packet) -> Option<&Subflow> {
        self.flows.iter().find(|sf| sf.matches_inbound(pkt))
    }

    /// Mutable variant of [`SubflowTable::find_inbound`].
    pub fn find_inbound_mut(&mut self, pkt: &Packet) -> Option<&mut Subflow> {
        self.flows.iter_mut().find(|sf| sf.matches_inbound(pkt))
    }

    /// First subflow matching an outbound packet's tuple.
    pub fn find_outbound(&self, pkt: &Packet) -> Option<&Subflow> {
        self.flows.iter().find(|sf| sf.matches_outbound(pkt))
    }

    /// Mutable variant of [`SubflowTable::find_outbound`].
    pub fn find_outbound_mut(&mut self, pkt: &Packet) -> Option<&mut Subflow> {
        self.flows.iter_mut().find(|sf| sf.matches_outbound(pkt))
    }

    /// First subflow matching a socket's local/remote port pair.
    pub fn find_by_socket(&self, local_port: u16, remote_port: u16) -> Option<&Subflow> {
        self.flows
            .iter()
            .find(|sf| sf.src_port == local_port && sf.dst_port == remote_port)
    }
}
