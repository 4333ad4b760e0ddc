//! Raw packet buffers with typed IP and TCP views.
//!
//! A [`Packet`] owns one IP datagram and hands out zerocopy views of its
//! headers plus byte ranges for its TCP options. Validation happens once in
//! [`Packet::from_bytes`]; afterwards the accessors cannot fail.

pub mod checksum;
pub mod ip;
pub mod tcp;

use std::net::IpAddr;

use zerocopy::FromBytes;

use crate::error::{Error, Result};

pub use ip::{IPPROTO_TCP, Ipv4Hdr, Ipv6Hdr};
pub use tcp::{TCP_HDRLEN, TcpHdr, TcpOptionIter, TcpOptionRef, tcp_flags};

/// Which way a packet travels relative to the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Tool to kernel: a script packet the tool will inject.
    Inbound,
    /// Kernel to tool: a live packet sniffed off the kernel.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// One validated IP datagram carrying a TCP segment.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Vec<u8>,
    ip_header_len: usize,
    ip_total_len: usize,
}

impl Packet {
    /// Take ownership of a datagram and validate its framing.
    ///
    /// Requires a well-formed IPv4 or IPv6 header, protocol TCP, and a TCP
    /// header whose data offset fits inside the datagram.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        let version = buf.first().map(|b| b >> 4).ok_or(Error::Truncated {
            what: "IP header",
            expected: 1,
            actual: 0,
        })?;

        let (ip_header_len, ip_total_len, protocol) = match version {
            4 => {
                let hdr = Ipv4Hdr::from_bytes(&buf)?;
                let header_len = hdr.header_len();
                if header_len < std::mem::size_of::<Ipv4Hdr>() {
                    return Err(Error::Truncated {
                        what: "IPv4 header",
                        expected: std::mem::size_of::<Ipv4Hdr>(),
                        actual: header_len,
                    });
                }
                (header_len, usize::from(hdr.total_len.get()), hdr.protocol)
            }
            6 => {
                let hdr = Ipv6Hdr::from_bytes(&buf)?;
                (
                    Ipv6Hdr::LEN,
                    Ipv6Hdr::LEN + usize::from(hdr.payload_len.get()),
                    hdr.next_header,
                )
            }
            v => return Err(Error::UnsupportedIpVersion(v)),
        };

        if protocol != IPPROTO_TCP {
            return Err(Error::NotTcp { protocol });
        }
        if ip_total_len > buf.len() || ip_total_len < ip_header_len + TCP_HDRLEN {
            return Err(Error::Truncated {
                what: "IP datagram",
                expected: ip_total_len.max(ip_header_len + TCP_HDRLEN),
                actual: buf.len().min(ip_total_len),
            });
        }

        let tcp = TcpHdr::from_bytes(&buf[ip_header_len..ip_total_len])?;
        let tcp_header_len = tcp.header_len();
        if tcp_header_len < TCP_HDRLEN || ip_header_len + tcp_header_len > ip_total_len {
            return Err(Error::Truncated {
                what: "TCP header",
                expected: tcp_header_len,
                actual: ip_total_len - ip_header_len,
            });
        }

        Ok(Self {
            buf,
            ip_header_len,
            ip_total_len,
        })
    }

    /// The whole datagram.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// IPv4 header view, if this is an IPv4 datagram.
    pub fn ipv4(&self) -> Option<&Ipv4Hdr> {
        (self.buf[0] >> 4 == 4).then(|| {
            Ipv4Hdr::ref_from_prefix(&self.buf)
                .map(|(r, _)| r)
                .expect("validated in from_bytes")
        })
    }

    /// IPv6 header view, if this is an IPv6 datagram.
    pub fn ipv6(&self) -> Option<&Ipv6Hdr> {
        (self.buf[0] >> 4 == 6).then(|| {
            Ipv6Hdr::ref_from_prefix(&self.buf)
                .map(|(r, _)| r)
                .expect("validated in from_bytes")
        })
    }

    /// Source address.
    pub fn src_addr(&self) -> IpAddr {
        match self.ipv4() {
            Some(hdr) => hdr.src_addr(),
            None => self.ipv6().expect("validated in from_bytes").src_addr(),
        }
    }

    /// Destination address.
    pub fn dst_addr(&self) -> IpAddr {
        match self.ipv4() {
            Some(hdr) => hdr.dst_addr(),
            None => self.ipv6().expect("validated in from_bytes").dst_addr(),
        }
    }

    /// IP header length in bytes.
    pub fn ip_header_len(&self) -> usize {
        self.ip_header_len
    }

    /// Total datagram length per the IP header.
    pub fn ip_total_len(&self) -> usize {
        self.ip_total_len
    }

    /// TCP header view.
    pub fn tcp(&self) -> &TcpHdr {
        TcpHdr::ref_from_prefix(&self.buf[self.ip_header_len..])
            .map(|(r, _)| r)
            .expect("validated in from_bytes")
    }

    /// The TCP segment: header, options, and payload.
    pub fn tcp_segment(&self) -> &[u8] {
        &self.buf[self.ip_header_len..self.ip_total_len]
    }

    /// TCP payload length: IP total minus IP header minus full TCP header.
    pub fn tcp_payload_len(&self) -> u16 {
        (self.ip_total_len - self.ip_header_len - self.tcp().header_len()) as u16
    }

    /// Iterate the TCP options in header order.
    pub fn tcp_options(&self) -> TcpOptionIter<'_> {
        let start = self.ip_header_len + TCP_HDRLEN;
        let end = self.ip_header_len + self.tcp().header_len();
        TcpOptionIter::new(&self.buf[start..end], start)
    }

    /// First TCP option of the given kind, if any.
    pub fn find_tcp_option(&self, kind: u8) -> Option<TcpOptionRef> {
        self.tcp_options().find(|opt| opt.kind == kind)
    }

    /// Bytes of one option located by [`Packet::tcp_options`].
    pub fn option_bytes(&self, opt: TcpOptionRef) -> &[u8] {
        &self.buf[opt.offset..opt.offset + opt.len]
    }

    /// Mutable bytes of one option located by [`Packet::tcp_options`].
    pub fn option_bytes_mut(&mut self, opt: TcpOptionRef) -> &mut [u8] {
        &mut self.buf[opt.offset..opt.offset + opt.len]
    }
}
