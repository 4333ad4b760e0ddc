//! Frame and option builders shared by the integration tests.
#![allow(dead_code)]

use tcpdrill::mptcp::{Direction, MptcpEngine};
use tcpdrill::packet::{Packet, tcp_flags};

/// Tool-side IPv4 address used by the test frames.
pub const TOOL_IP: [u8; 4] = [10, 0, 0, 1];
/// Kernel-side IPv4 address used by the test frames.
pub const KERNEL_IP: [u8; 4] = [192, 168, 0, 1];

pub const SYN: u8 = tcp_flags::SYN;
pub const ACK: u8 = tcp_flags::ACK;

/// Build an IPv4 TCP frame with the given options and a zeroed payload.
pub fn frame(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    flags: u8,
    options: &[u8],
    payload_len: usize,
) -> Packet {
    let opts_len = options.len().div_ceil(4) * 4;
    let tcp_len = 20 + opts_len;
    let total = 20 + tcp_len + payload_len;

    let mut buf = vec![0u8; total];
    buf[0] = 0x45;
    buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    buf[8] = 64; // ttl
    buf[9] = 6; // TCP
    buf[12..16].copy_from_slice(&src_ip);
    buf[16..20].copy_from_slice(&dst_ip);

    buf[20..22].copy_from_slice(&src_port.to_be_bytes());
    buf[22..24].copy_from_slice(&dst_port.to_be_bytes());
    buf[32] = ((tcp_len / 4) as u8) << 4;
    buf[33] = flags;
    buf[40..40 + options.len()].copy_from_slice(options);

    Packet::from_bytes(buf).expect("test frame must validate")
}

/// Build an IPv6 TCP frame with the given options and a zeroed payload.
pub fn frame6(
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    src_port: u16,
    dst_port: u16,
    flags: u8,
    options: &[u8],
    payload_len: usize,
) -> Packet {
    let opts_len = options.len().div_ceil(4) * 4;
    let tcp_len = 20 + opts_len;
    let total = 40 + tcp_len + payload_len;

    let mut buf = vec![0u8; total];
    buf[0] = 0x60;
    buf[4..6].copy_from_slice(&((tcp_len + payload_len) as u16).to_be_bytes());
    buf[6] = 6; // TCP
    buf[7] = 64; // hop limit
    buf[8..24].copy_from_slice(&src_ip);
    buf[24..40].copy_from_slice(&dst_ip);

    buf[40..42].copy_from_slice(&src_port.to_be_bytes());
    buf[42..44].copy_from_slice(&dst_port.to_be_bytes());
    buf[52] = ((tcp_len / 4) as u8) << 4;
    buf[53] = flags;
    buf[60..60 + options.len()].copy_from_slice(options);

    Packet::from_bytes(buf).expect("test frame must validate")
}

/// Script packet travelling tool to kernel.
pub fn inbound(src_port: u16, dst_port: u16, flags: u8, options: &[u8], payload_len: usize) -> Packet {
    frame(TOOL_IP, KERNEL_IP, src_port, dst_port, flags, options, payload_len)
}

/// Packet travelling kernel to tool (live capture or the script's expected
/// rendition of it).
pub fn outbound(src_port: u16, dst_port: u16, flags: u8, options: &[u8], payload_len: usize) -> Packet {
    frame(KERNEL_IP, TOOL_IP, src_port, dst_port, flags, options, payload_len)
}

/// MP_CAPABLE as carried on SYN / SYN-ACK.
pub fn mp_capable_syn_opt(key: u64) -> Vec<u8> {
    let mut opt = vec![30, 12, 0x00, 0x00];
    opt.extend_from_slice(&key.to_be_bytes());
    opt
}

/// MP_CAPABLE as carried on the final handshake ACK.
pub fn mp_capable_opt(sender_key: u64, receiver_key: u64) -> Vec<u8> {
    let mut opt = vec![30, 20, 0x00, 0x00];
    opt.extend_from_slice(&sender_key.to_be_bytes());
    opt.extend_from_slice(&receiver_key.to_be_bytes());
    opt
}

/// MP_JOIN as carried on SYN.
pub fn mp_join_syn_opt(address_id: u8, token: u32, random: u32) -> Vec<u8> {
    let mut opt = vec![30, 12, 0x10, address_id];
    opt.extend_from_slice(&token.to_be_bytes());
    opt.extend_from_slice(&random.to_be_bytes());
    opt
}

/// MP_JOIN as carried on SYN-ACK.
pub fn mp_join_syn_ack_opt(address_id: u8, hmac: u64, random: u32) -> Vec<u8> {
    let mut opt = vec![30, 16, 0x10, address_id];
    opt.extend_from_slice(&hmac.to_be_bytes());
    opt.extend_from_slice(&random.to_be_bytes());
    opt
}

/// MP_JOIN as carried on the joining subflow's third ACK.
pub fn mp_join_ack_opt() -> Vec<u8> {
    let mut opt = vec![30, 24, 0x10, 0x00];
    opt.extend_from_slice(&[0u8; 20]);
    opt
}

/// DSS with an 8-octet DSN mapping, the script's literal DSN value, and
/// zeroed mapping fields for the engine to fill.
pub fn dss_dsn8_opt(raw_dsn: u64, with_checksum: bool) -> Vec<u8> {
    let len: u8 = if with_checksum { 20 } else { 18 };
    let mut opt = vec![30, len, 0x20, 0x04 | 0x08];
    opt.extend_from_slice(&raw_dsn.to_be_bytes());
    opt.extend_from_slice(&[0u8; 6]); // subflow seq + data-level length
    if with_checksum {
        opt.extend_from_slice(&[0u8; 2]);
    }
    opt
}

/// DSS carrying only an 8-octet data ACK.
pub fn dss_dack8_opt(raw_dack: u64) -> Vec<u8> {
    let mut opt = vec![30, 12, 0x20, 0x01 | 0x02];
    opt.extend_from_slice(&raw_dack.to_be_bytes());
    opt
}

/// Bytes of the first MPTCP option in a packet.
pub fn mptcp_opt_bytes(pkt: &Packet) -> &[u8] {
    let opt = pkt.find_tcp_option(30).expect("packet carries MPTCP option");
    pkt.option_bytes(opt)
}

pub fn be16(bytes: &[u8], off: usize) -> u16 {
    u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap())
}

pub fn be32(bytes: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(bytes[off..off + 4].try_into().unwrap())
}

pub fn be64(bytes: &[u8], off: usize) -> u64 {
    u64::from_be_bytes(bytes[off..off + 8].try_into().unwrap())
}

/// Drive the MP_CAPABLE handshake with script-declared keys on ports
/// 4000 -> 8080, leaving the session established with one subflow.
pub fn complete_handshake(engine: &mut MptcpEngine, local_key: u64, peer_key: u64) {
    engine.declare_script_key("c", local_key);
    engine.declare_script_key("s", peer_key);

    engine.enqueue_var("c").unwrap();
    let mut syn = inbound(4000, 8080, SYN, &mp_capable_syn_opt(0), 0);
    engine.process(&mut syn, None, Direction::Inbound).unwrap();

    engine.enqueue_var("s").unwrap();
    let live = outbound(8080, 4000, SYN | ACK, &mp_capable_syn_opt(peer_key), 0);
    let mut expected = outbound(8080, 4000, SYN | ACK, &mp_capable_syn_opt(0), 0);
    engine
        .process(&mut expected, Some(&live), Direction::Outbound)
        .unwrap();

    engine.enqueue_var("c").unwrap();
    engine.enqueue_var("s").unwrap();
    let mut ack = inbound(4000, 8080, ACK, &mp_capable_opt(0, 0), 0);
    engine.process(&mut ack, None, Direction::Inbound).unwrap();
}
