//! TCP header view and option iteration.

use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};

/// TCP flag bits (low byte of the flags field).
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// Option kind: end of option list.
pub const TCPOPT_EOL: u8 = 0;
/// Option kind: no-operation padding.
pub const TCPOPT_NOP: u8 = 1;

/// Mandatory TCP header length (no options).
pub const TCP_HDRLEN: usize = 20;

/// TCP header (without options).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TcpHdr {
    /// Source port.
    pub src_port: U16,
    /// Destination port.
    pub dst_port: U16,
    /// Sequence number.
    pub seq: U32,
    /// Acknowledgment number.
    pub ack_seq: U32,
    /// Data offset in 32-bit words (high nibble); low nibble reserved.
    pub data_off: u8,
    /// Flag bits.
    pub flags: u8,
    /// Receive window.
    pub window: U16,
    /// Checksum.
    pub checksum: U16,
    /// Urgent pointer.
    pub urg_ptr: U16,
}

impl TcpHdr {
    /// Header length in bytes, options included.
    pub fn header_len(&self) -> usize {
        usize::from(self.data_off >> 4) * 4
    }

    /// SYN flag.
    pub fn syn(&self) -> bool {
        self.flags & tcp_flags::SYN != 0
    }

    /// ACK flag.
    pub fn ack(&self) -> bool {
        self.flags & tcp_flags::ACK != 0
    }

    /// FIN flag.
    pub fn fin(&self) -> bool {
        self.flags & tcp_flags::FIN != 0
    }

    /// Parse from the front of a TCP segment.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                what: "TCP header",
                expected: TCP_HDRLEN,
                actual: data.len(),
            })
    }
}

/// Location of one TCP option inside a packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOptionRef {
    /// Option kind byte.
    pub kind: u8,
    /// Absolute offset of the option in the packet buffer.
    pub offset: usize,
    /// Total option length including kind and length bytes.
    pub len: usize,
}

/// Iterator over the TCP options region.
///
/// Yields option locations in header order. Stops at end-of-list or at the
/// first malformed length, like the kernel does; single-byte NOP padding is
/// yielded as options of length 1.
pub struct TcpOptionIter<'a> {
    data: &'a [u8],
    /// Absolute buffer offset of `data[0]`.
    base: usize,
}

impl<'a> TcpOptionIter<'a> {
    /// Iterate options in `data`, reporting offsets relative to `base`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, base }
    }
}

impl Iterator for TcpOptionIter<'_> {
    type Item = TcpOptionRef;

    fn next(&mut self) -> Option<Self::Item> {
        let (&kind, rest) = self.data.split_first()?;
        if kind == TCPOPT_EOL {
            return None;
        }
        if kind == TCPOPT_NOP {
            let opt = TcpOptionRef {
                kind,
                offset: self.base,
                len: 1,
            };
            self.data = rest;
            self.base += 1;
            return Some(opt);
        }

        let len = usize::from(*rest.first()?);
        if len < 2 || len > self.data.len() {
            return None;
        }
        let opt = TcpOptionRef {
            kind,
            offset: self.base,
            len,
        };
        self.data = &self.data[len..];
        self.base += len;
        Some(opt)
    }
}
