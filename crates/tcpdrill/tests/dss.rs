//! DSS rewriting scenarios.

mod common;

use common::*;
use tcpdrill::mptcp::crypto::idsn64;
use tcpdrill::mptcp::{Direction, MptcpEngine};
use tcpdrill::packet::Packet;
use tcpdrill::packet::checksum::InternetChecksum;

const LOCAL_KEY: u64 = 0x1122334455667788;
const PEER_KEY: u64 = 0xAABBCCDDEEFF0011;

/// Recompute a DSS checksum from the rewritten packet: zero the checksum
/// field, then one sum over the pseudo-header and the TCP segment.
fn expected_dss_checksum(pkt: &Packet) -> u16 {
    let opt = pkt.find_tcp_option(30).unwrap();
    let bytes = pkt.option_bytes(opt);
    let mut pseudo = [0u8; 16];
    pseudo[..14].copy_from_slice(&bytes[4..18]);

    let mut copy = pkt.clone();
    let copy_opt = copy.find_tcp_option(30).unwrap();
    copy.option_bytes_mut(copy_opt)[18..20].fill(0);

    let mut ck = InternetChecksum::new();
    ck.push(&pseudo);
    ck.push(copy.tcp_segment());
    ck.finish()
}

/// First mapping: DSN starts at the initial DSN, subflow sequence at zero.
#[test]
fn test_dss_first_mapping() {
    let mut engine = MptcpEngine::with_seed(50);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let mut pkt = inbound(4000, 8080, ACK, &dss_dsn8_opt(0, true), 1000);
    engine.process(&mut pkt, None, Direction::Inbound).unwrap();

    let idsn = idsn64(LOCAL_KEY);
    let opt = mptcp_opt_bytes(&pkt);
    assert_eq!(be64(opt, 4), idsn);
    assert_eq!(be32(opt, 12), 0);
    assert_eq!(be16(opt, 16), 1000);
    assert_eq!(be16(opt, 18), expected_dss_checksum(&pkt));

    let subflow = engine.subflows().find_by_socket(4000, 8080).unwrap();
    assert_eq!(subflow.subflow_seq, 1000);
}

/// Second mapping continues both sequence spaces.
#[test]
fn test_dss_continuation() {
    let mut engine = MptcpEngine::with_seed(51);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let mut first = inbound(4000, 8080, ACK, &dss_dsn8_opt(0, true), 1000);
    engine.process(&mut first, None, Direction::Inbound).unwrap();

    let mut second = inbound(4000, 8080, ACK, &dss_dsn8_opt(1000, true), 500);
    engine.process(&mut second, None, Direction::Inbound).unwrap();

    let idsn = idsn64(LOCAL_KEY);
    let opt = mptcp_opt_bytes(&second);
    assert_eq!(be64(opt, 4), idsn + 1000);
    assert_eq!(be32(opt, 12), 1000);
    assert_eq!(be16(opt, 16), 500);

    let subflow = engine.subflows().find_by_socket(4000, 8080).unwrap();
    assert_eq!(subflow.subflow_seq, 1500);
}

/// The checksum-less variant addresses data relative to IDSN+1.
#[test]
fn test_dss_without_checksum_shifts() {
    let mut engine = MptcpEngine::with_seed(52);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let mut pkt = inbound(4000, 8080, ACK, &dss_dsn8_opt(0, false), 1);
    engine.process(&mut pkt, None, Direction::Inbound).unwrap();

    let opt = mptcp_opt_bytes(&pkt);
    assert_eq!(opt.len(), 18);
    assert_eq!(be64(opt, 4), idsn64(LOCAL_KEY) + 1);
    assert_eq!(be16(opt, 16), 1);

    let subflow = engine.subflows().find_by_socket(4000, 8080).unwrap();
    assert_eq!(subflow.subflow_seq, 1);
}

/// Data ACKs shift by the initial DACK derived from the peer key.
#[test]
fn test_dss_dack() {
    let mut engine = MptcpEngine::with_seed(53);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let mut pkt = inbound(4000, 8080, ACK, &dss_dack8_opt(7), 0);
    engine.process(&mut pkt, None, Direction::Inbound).unwrap();

    assert_eq!(be64(mptcp_opt_bytes(&pkt), 4), idsn64(PEER_KEY) + 7);
}

/// Outbound DSS options are left exactly as captured.
#[test]
fn test_dss_outbound_untouched() {
    let mut engine = MptcpEngine::with_seed(54);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let live = outbound(8080, 4000, ACK, &dss_dsn8_opt(0x42, true), 100);
    let mut expected = outbound(8080, 4000, ACK, &dss_dsn8_opt(0x42, true), 100);
    let before = mptcp_opt_bytes(&expected).to_vec();
    engine
        .process(&mut expected, Some(&live), Direction::Outbound)
        .unwrap();
    assert_eq!(mptcp_opt_bytes(&expected), &before[..]);
}

/// DSS before the handshake derived the initial values is a state error.
#[test]
fn test_dss_before_handshake() {
    let mut engine = MptcpEngine::with_seed(55);
    let mut pkt = inbound(4000, 8080, ACK, &dss_dsn8_opt(0, true), 10);
    let err = engine.process(&mut pkt, None, Direction::Inbound).unwrap_err();
    assert!(err.is_state_error());
}

/// DSS on a tuple with no subflow is a state error.
#[test]
fn test_dss_unknown_subflow() {
    let mut engine = MptcpEngine::with_seed(56);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    let mut pkt = inbound(5555, 8080, ACK, &dss_dsn8_opt(0, true), 10);
    let err = engine.process(&mut pkt, None, Direction::Inbound).unwrap_err();
    assert!(err.is_state_error());
}

/// A DSN-bearing DSS whose length fits neither variant is rejected.
#[test]
fn test_dss_bad_length() {
    let mut engine = MptcpEngine::with_seed(57);
    complete_handshake(&mut engine, LOCAL_KEY, PEER_KEY);

    // Claim the DSN8 flags but a 4-octet DSN's length.
    let mut opt = vec![30, 14, 0x20, 0x0c];
    opt.extend_from_slice(&[0u8; 10]);
    let mut pkt = inbound(4000, 8080, ACK, &opt, 0);
    let err = engine.process(&mut pkt, None, Direction::Inbound).unwrap_err();
    assert!(err.is_option_error());
}
