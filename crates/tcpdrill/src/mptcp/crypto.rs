//! SHA-1 and HMAC-SHA1 derivations for the MPTCP handshakes.
//!
//! All key and nonce material is serialized big-endian before hashing, so
//! the results match what the kernel computes from the wire bytes on any
//! host.

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Session token: the most-significant 32 bits of SHA-1 over the key's
/// network-order serialization (RFC 6824 §3.2).
pub fn token32(key: u64) -> u32 {
    let digest: [u8; 20] = Sha1::digest(key.to_be_bytes()).into();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Initial data sequence number: the least-significant 64 bits of SHA-1
/// over the key's network-order serialization.
pub fn idsn64(key: u64) -> u64 {
    let digest: [u8; 20] = Sha1::digest(key.to_be_bytes()).into();
    u64::from_be_bytes([
        digest[12], digest[13], digest[14], digest[15], digest[16], digest[17], digest[18],
        digest[19],
    ])
}

/// Full HMAC-SHA1 tag over the two nonces, keyed by `key_a` then `key_b`.
///
/// The argument order is direction-sensitive: the kernel validates a
/// subflow HMAC with the initiator's material first, so callers pass
/// (local, peer) material when the tool initiated the subflow's packet and
/// (peer, local) when the kernel did.
pub fn hmac160(key_a: u64, key_b: u64, n_a: u32, n_b: u32) -> [u8; 20] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&key_a.to_be_bytes());
    key[8..].copy_from_slice(&key_b.to_be_bytes());

    let mut msg = [0u8; 8];
    msg[..4].copy_from_slice(&n_a.to_be_bytes());
    msg[4..].copy_from_slice(&n_b.to_be_bytes());

    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC-SHA1 accepts any key length");
    mac.update(&msg);
    mac.finalize().into_bytes().into()
}

/// Leading 64 bits of [`hmac160`], as carried in MP_JOIN SYN/ACK options.
pub fn hmac64(key_a: u64, key_b: u64, n_a: u32, n_b: u32) -> u64 {
    let tag = hmac160(key_a, key_b, n_a, n_b);
    u64::from_be_bytes([
        tag[0], tag[1], tag[2], tag[3], tag[4], tag[5], tag[6], tag[7],
    ])
}
