//! MPTCP option wire layouts (RFC 6824).
//!
//! Every multi-byte field is a network-endian zerocopy integer, so writes
//! through these views serialize in the byte order the RFC mandates
//! regardless of host endianness.

use zerocopy::byteorder::network_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};

/// TCP option kind shared by all MPTCP options.
pub const TCPOPT_MPTCP: u8 = 30;

/// MPTCP option subtypes handled by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MptcpSubtype {
    /// MP_CAPABLE: announces MPTCP support, carries the session keys.
    Capable,
    /// MP_JOIN: adds a subflow, authenticated by HMAC over keys and nonces.
    Join,
    /// DSS: data sequence signal.
    Dss,
}

impl MptcpSubtype {
    /// Decode the subtype nibble.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Capable),
            1 => Some(Self::Join),
            2 => Some(Self::Dss),
            _ => None,
        }
    }
}

impl std::fmt::Display for MptcpSubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capable => f.write_str("MP_CAPABLE"),
            Self::Join => f.write_str("MP_JOIN"),
            Self::Dss => f.write_str("DSS"),
        }
    }
}

/// Read the subtype of an MPTCP option's raw bytes.
pub fn subtype_of(option: &[u8]) -> Result<MptcpSubtype> {
    let raw = option.get(2).map(|b| b >> 4).ok_or(Error::Truncated {
        what: "MPTCP option",
        expected: 3,
        actual: option.len(),
    })?;
    MptcpSubtype::from_raw(raw).ok_or(Error::UnknownSubtype(raw))
}

/// Declared option lengths, one per handshake shape.
pub mod optlen {
    /// MP_CAPABLE on SYN or SYN/ACK: one key.
    pub const MP_CAPABLE_SYN: usize = 12;
    /// MP_CAPABLE on the final ACK: both keys.
    pub const MP_CAPABLE: usize = 20;
    /// MP_JOIN on SYN: token and nonce.
    pub const MP_JOIN_SYN: usize = 12;
    /// MP_JOIN on SYN/ACK: truncated HMAC and nonce.
    pub const MP_JOIN_SYN_ACK: usize = 16;
    /// MP_JOIN on the third ACK: full 160-bit HMAC.
    pub const MP_JOIN_ACK: usize = 24;
    /// DSS with an 8-octet DSN and a checksum, no DACK.
    pub const DSS_DSN8: usize = 20;
    /// DSS with an 8-octet DSN and no checksum, no DACK.
    pub const DSS_DSN8_NOCS: usize = 18;
}

/// DSS flag bits (second header byte).
pub mod dss_flags {
    /// Data ACK present.
    pub const DACK: u8 = 0x01;
    /// Data ACK is 8 octets.
    pub const DACK8: u8 = 0x02;
    /// DSN, subflow sequence, and data-level length present.
    pub const DSN: u8 = 0x04;
    /// DSN is 8 octets.
    pub const DSN8: u8 = 0x08;
    /// Data FIN.
    pub const FIN: u8 = 0x10;
}

/// MP_CAPABLE as sent on SYN and SYN/ACK.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MpCapableSyn {
    /// Option kind (30).
    pub kind: u8,
    /// Option length (12).
    pub length: u8,
    /// Subtype nibble and protocol version nibble.
    pub subtype_version: u8,
    /// Capability flags (checksum required, crypto algorithm).
    pub flags: u8,
    /// The sender's 64-bit key.
    pub key: U64,
}

/// MP_CAPABLE as sent on the handshake's final ACK.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MpCapable {
    pub kind: u8,
    pub length: u8,
    pub subtype_version: u8,
    pub flags: u8,
    /// Key of the ACK's sender.
    pub sender_key: U64,
    /// Key of the ACK's receiver.
    pub receiver_key: U64,
}

/// MP_JOIN as sent on SYN.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MpJoinSyn {
    pub kind: u8,
    pub length: u8,
    /// Subtype nibble and the backup-path bit.
    pub subtype_backup: u8,
    /// Address ID of the joining endpoint.
    pub address_id: u8,
    /// Token identifying the session being joined.
    pub receiver_token: U32,
    /// The sender's random nonce.
    pub sender_random: U32,
}

/// MP_JOIN as sent on SYN/ACK.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MpJoinSynAck {
    pub kind: u8,
    pub length: u8,
    pub subtype_backup: u8,
    pub address_id: u8,
    /// Leading 64 bits of the sender's HMAC.
    pub sender_hmac: U64,
    /// The sender's random nonce.
    pub sender_random: U32,
}

/// MP_JOIN as sent on the joining subflow's third ACK.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MpJoinAck {
    pub kind: u8,
    pub length: u8,
    pub subtype_reserved: u8,
    pub reserved: u8,
    /// The sender's full HMAC-SHA1 tag.
    pub sender_hmac: [u8; 20],
}

/// Common DSS header; DACK/DSN blocks follow per the flag bits.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DssHdr {
    pub kind: u8,
    pub length: u8,
    /// Subtype nibble, rest reserved.
    pub subtype_reserved: u8,
    /// DSS flag bits, see [`dss_flags`].
    pub flags: u8,
}

impl DssHdr {
    /// Size in bytes of the DACK block these flags announce.
    pub fn dack_len(&self) -> usize {
        if self.flags & dss_flags::DACK == 0 {
            0
        } else if self.flags & dss_flags::DACK8 != 0 {
            8
        } else {
            4
        }
    }

    /// Whether a DSN mapping with an 8-octet DSN follows the DACK block.
    pub fn has_dsn8(&self) -> bool {
        self.flags & dss_flags::DSN != 0 && self.flags & dss_flags::DSN8 != 0
    }
}

/// DSN mapping block with a trailing checksum.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DssDsn8 {
    /// Data sequence number.
    pub dsn: U64,
    /// Subflow-relative sequence number.
    pub subflow_seq: U32,
    /// Data-level length of this mapping.
    pub data_len: U16,
    /// DSS checksum.
    pub checksum: U16,
}

/// DSN mapping block without a checksum.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DssDsn8NoCs {
    pub dsn: U64,
    pub subflow_seq: U32,
    pub data_len: U16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_match_declared_lengths() {
        assert_eq!(std::mem::size_of::<MpCapableSyn>(), optlen::MP_CAPABLE_SYN);
        assert_eq!(std::mem::size_of::<MpCapable>(), optlen::MP_CAPABLE);
        assert_eq!(std::mem::size_of::<MpJoinSyn>(), optlen::MP_JOIN_SYN);
        assert_eq!(std::mem::size_of::<MpJoinSynAck>(), optlen::MP_JOIN_SYN_ACK);
        assert_eq!(std::mem::size_of::<MpJoinAck>(), optlen::MP_JOIN_ACK);
        assert_eq!(std::mem::size_of::<DssHdr>() + std::mem::size_of::<DssDsn8>(), optlen::DSS_DSN8);
        assert_eq!(
            std::mem::size_of::<DssHdr>() + std::mem::size_of::<DssDsn8NoCs>(),
            optlen::DSS_DSN8_NOCS
        );
    }

    #[test]
    fn test_subtype_of() {
        assert_eq!(
            subtype_of(&[30, 12, 0x00, 0]).unwrap(),
            MptcpSubtype::Capable
        );
        assert_eq!(subtype_of(&[30, 12, 0x10, 0]).unwrap(), MptcpSubtype::Join);
        assert_eq!(subtype_of(&[30, 20, 0x20, 0]).unwrap(), MptcpSubtype::Dss);
        assert!(matches!(
            subtype_of(&[30, 4, 0xf0, 0]).unwrap_err(),
            Error::UnknownSubtype(15)
        ));
        assert!(matches!(
            subtype_of(&[30, 2]).unwrap_err(),
            Error::Truncated { .. }
        ));
    }

    #[test]
    fn test_dss_header_flags() {
        let hdr = DssHdr {
            kind: TCPOPT_MPTCP,
            length: optlen::DSS_DSN8 as u8,
            subtype_reserved: 0x20,
            flags: dss_flags::DSN | dss_flags::DSN8,
        };
        assert_eq!(hdr.dack_len(), 0);
        assert!(hdr.has_dsn8());

        let hdr = DssHdr {
            flags: dss_flags::DACK | dss_flags::DACK8,
            ..hdr
        };
        assert_eq!(hdr.dack_len(), 8);
        assert!(!hdr.has_dsn8());
    }

    #[test]
    fn test_field_byte_order() {
        let mut bytes = [0u8; 12];
        bytes[0] = TCPOPT_MPTCP;
        bytes[1] = optlen::MP_CAPABLE_SYN as u8;
        let opt = MpCapableSyn::mut_from_bytes(&mut bytes).unwrap();
        opt.key.set(0x1122334455667788);
        assert_eq!(
            &bytes[4..12],
            &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
    }
}
