//! The attribute (TLV) codec: parsing into a sparse, descriptor-checked
//! vector, and building aligned, optionally nested attribute streams.
//!
//! Every recognized attribute code declares, in a small per-message-class
//! descriptor table, whether it is expected at all and (if so) whether
//! its payload size is fixed. Unrecognized codes are ignored; a
//! recognized code with the wrong size rejects the whole message. This
//! mirrors the kernel-facing protocols' own convention of small integer
//! attribute codes with a handful of fixed-size numeric/address payloads
//! plus a few variable-length or nested ones (metrics, multipath,
//! encapsulation).

use crate::align::align;
use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const HEADER_LEN: usize = 4;

/// Describes how a single attribute code should be validated.
#[derive(Clone, Copy)]
pub struct Spec {
    pub defined: bool,
    pub check_size: bool,
    pub expected_size: u16,
}

impl Spec {
    pub const UNDEFINED: Spec = Spec {
        defined: false,
        check_size: false,
        expected_size: 0,
    };

    #[must_use]
    pub const fn unchecked() -> Spec {
        Spec {
            defined: true,
            check_size: false,
            expected_size: 0,
        }
    }

    #[must_use]
    pub const fn checked(size: u16) -> Spec {
        Spec {
            defined: true,
            check_size: true,
            expected_size: size,
        }
    }
}

/// Sparse, fixed-capacity view over the attributes found in one stream,
/// indexed directly by attribute code.
pub struct Set<'a, const N: usize> {
    slots: [Option<&'a [u8]>; N],
}

impl<'a, const N: usize> Set<'a, N> {
    #[must_use]
    pub fn get(&self, code: usize) -> Option<&'a [u8]> {
        self.slots.get(code).copied().flatten()
    }

    #[must_use]
    pub fn get_u16(&self, code: usize) -> Option<u16> {
        self.get(code)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_ne_bytes)
    }

    #[must_use]
    pub fn get_u32(&self, code: usize) -> Option<u32> {
        self.get(code)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_ne_bytes)
    }

    #[must_use]
    pub fn get_ip4(&self, code: usize) -> Option<Ipv4Addr> {
        self.get(code)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(Ipv4Addr::from)
    }

    #[must_use]
    pub fn get_ip6(&self, code: usize) -> Option<Ipv6Addr> {
        self.get(code)
            .and_then(|b| <[u8; 16]>::try_from(b).ok())
            .map(Ipv6Addr::from)
    }

    /// Address attributes carry either an IPv4 or IPv6 payload,
    /// distinguished only by length -- the family is already known from
    /// context (the message's own address family).
    #[must_use]
    pub fn get_ipa(&self, code: usize) -> Option<IpAddr> {
        match self.get(code)?.len() {
            4 => self.get_ip4(code).map(IpAddr::V4),
            16 => self.get_ip6(code).map(IpAddr::V6),
            _ => None,
        }
    }

    /// A family-tagged "via" record: a 2-byte family followed by the
    /// address bytes for that family (used for MPLS gateways, which may
    /// be reached over either IPv4 or IPv6).
    #[must_use]
    pub fn get_via(&self, code: usize) -> Option<IpAddr> {
        let b = self.get(code)?;
        if b.len() < 2 {
            return None;
        }
        let family = u16::from_ne_bytes([b[0], b[1]]);
        let addr = &b[2..];
        match (family, addr.len()) {
            (crate::model::AF_INET, 4) => {
                Some(IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?)))
            }
            (crate::model::AF_INET6, 16) => {
                Some(IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?)))
            }
            _ => None,
        }
    }
}

/// Parses a flat attribute stream against a descriptor table. A size
/// mismatch on a recognized code, or a trailing remnant too small to be
/// a full attribute header, rejects the entire stream -- the caller logs
/// and drops the containing message.
pub fn parse<'a, const N: usize>(mut buf: &'a [u8], want: &[Spec; N]) -> Result<Set<'a, N>> {
    let mut slots: [Option<&'a [u8]>; N] = [None; N];

    while !buf.is_empty() {
        if buf.len() < HEADER_LEN {
            log::error!("nl_parse_attrs: remnant of size {}", buf.len());
            return Err(Error::Truncated);
        }
        let len = u16::from_ne_bytes([buf[0], buf[1]]) as usize;
        let typ = u16::from_ne_bytes([buf[2], buf[3]]) as usize;
        if len < HEADER_LEN || len > buf.len() {
            log::error!("nl_parse_attrs: malformed attribute received");
            return Err(Error::Truncated);
        }
        let value = &buf[HEADER_LEN..len];

        if typ < N && want[typ].defined {
            if want[typ].check_size && value.len() != want[typ].expected_size as usize {
                log::error!("nl_parse_attrs: malformed attribute received");
                return Err(Error::Truncated);
            }
            slots[typ] = Some(value);
        }

        let consumed = align(len).min(buf.len());
        buf = &buf[consumed..];
    }

    Ok(Set { slots })
}

/// Growing, bounds-checked buffer for building a single request message.
/// `limit` is the allocated capacity; exceeding it is the "packet buffer
/// overflow" fatal condition, surfaced here as an `Err` instead of an
/// abort so the caller (which owns the process-exit policy) decides.
pub struct Builder {
    buf: Vec<u8>,
    limit: usize,
}

impl Builder {
    #[must_use]
    pub fn with_capacity(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit),
            limit,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn reserve(&self, extra: usize) -> Result<()> {
        if self.buf.len() + extra > self.limit {
            return Err(Error::BufferOverflow);
        }
        Ok(())
    }

    pub fn push_bytes(&mut self, code: u16, data: &[u8]) -> Result<()> {
        let total = HEADER_LEN + data.len();
        self.reserve(align(total))?;
        self.buf
            .extend_from_slice(&(total as u16).to_ne_bytes());
        self.buf.extend_from_slice(&code.to_ne_bytes());
        self.buf.extend_from_slice(data);
        let pad = align(self.buf.len()) - self.buf.len();
        self.buf.extend(std::iter::repeat(0u8).take(pad));
        Ok(())
    }

    pub fn push_u16(&mut self, code: u16, val: u16) -> Result<()> {
        self.push_bytes(code, &val.to_ne_bytes())
    }

    pub fn push_u32(&mut self, code: u16, val: u32) -> Result<()> {
        self.push_bytes(code, &val.to_ne_bytes())
    }

    pub fn push_ip4(&mut self, code: u16, val: Ipv4Addr) -> Result<()> {
        self.push_bytes(code, &val.octets())
    }

    pub fn push_ip6(&mut self, code: u16, val: Ipv6Addr) -> Result<()> {
        self.push_bytes(code, &val.octets())
    }

    pub fn push_ipa(&mut self, code: u16, val: IpAddr) -> Result<()> {
        match val {
            IpAddr::V4(a) => self.push_ip4(code, a),
            IpAddr::V6(a) => self.push_ip6(code, a),
        }
    }

    /// `RTA_VIA`-style family-tagged gateway.
    pub fn push_via(&mut self, code: u16, val: IpAddr) -> Result<()> {
        match val {
            IpAddr::V4(a) => {
                let mut data = Vec::with_capacity(6);
                data.extend_from_slice(&crate::model::AF_INET.to_ne_bytes());
                data.extend_from_slice(&a.octets());
                self.push_bytes(code, &data)
            }
            IpAddr::V6(a) => {
                let mut data = Vec::with_capacity(18);
                data.extend_from_slice(&crate::model::AF_INET6.to_ne_bytes());
                data.extend_from_slice(&a.octets());
                self.push_bytes(code, &data)
            }
        }
    }

    pub fn push_mpls_stack(&mut self, code: u16, labels: &[u32]) -> Result<()> {
        let mut data = Vec::with_capacity(labels.len() * 4);
        crate::route::metrics::encode_mpls_stack(&mut data, labels);
        self.push_bytes(code, &data)
    }

    /// Opens a nested attribute group, returning a cursor to rewrite its
    /// length once its children have been written.
    pub fn open_nested(&mut self, code: u16) -> Result<usize> {
        self.reserve(HEADER_LEN)?;
        let start = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&code.to_ne_bytes());
        Ok(start)
    }

    pub fn close_nested(&mut self, start: usize) {
        let len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Opens one multipath next-hop entry: `{len, flags, weight, ifindex}`
    /// followed by its own private attribute stream.
    pub fn open_nexthop(&mut self, flags: u8, weight: u8, ifindex: u32) -> Result<usize> {
        self.reserve(NEXTHOP_HEADER_LEN)?;
        let start = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.push(flags);
        self.buf.push(weight);
        self.buf.extend_from_slice(&ifindex.to_ne_bytes());
        Ok(start)
    }

    pub fn close_nexthop(&mut self, start: usize) {
        let len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }
}

pub const NEXTHOP_HEADER_LEN: usize = 8;
pub const ONLINK: u8 = 0x4;

/// One multipath next-hop entry as found on the wire.
pub struct NextHopEntry<'a> {
    pub flags: u8,
    pub weight: u8,
    pub ifindex: u32,
    pub attrs: &'a [u8],
}

/// Splits a `RTA_MULTIPATH` payload into its next-hop entries. Any
/// truncated entry is a hard failure -- the caller abandons the whole
/// route rather than importing a partial next-hop set.
pub fn parse_multipath(buf: &[u8]) -> Result<Vec<NextHopEntry<'_>>> {
    let mut out = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        if rest.len() < NEXTHOP_HEADER_LEN {
            return Err(Error::Truncated);
        }
        let len = u16::from_ne_bytes([rest[0], rest[1]]) as usize;
        if len < NEXTHOP_HEADER_LEN || len > rest.len() {
            return Err(Error::Truncated);
        }
        let flags = rest[2];
        let weight = rest[3];
        let ifindex = u32::from_ne_bytes(rest[4..8].try_into().unwrap());
        let attrs = &rest[NEXTHOP_HEADER_LEN..len];
        out.push(NextHopEntry {
            flags,
            weight,
            ifindex,
            attrs,
        });
        let consumed = align(len).min(rest.len());
        rest = &rest[consumed..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WANT: [Spec; 4] = [Spec::UNDEFINED, Spec::checked(4), Spec::unchecked(), Spec::UNDEFINED];

    #[test]
    fn round_trips_a_u32_attribute() {
        let mut b = Builder::with_capacity(64);
        b.push_u32(1, 0xdead_beef).unwrap();
        let bytes = b.into_bytes();
        let set = parse(&bytes, &WANT).unwrap();
        assert_eq!(set.get_u32(1), Some(0xdead_beef));
    }

    #[test]
    fn ignores_unrecognized_codes() {
        let mut b = Builder::with_capacity(64);
        b.push_u32(99, 1).unwrap();
        b.push_u32(1, 7).unwrap();
        let bytes = b.into_bytes();
        let set = parse(&bytes, &WANT).unwrap();
        assert_eq!(set.get_u32(1), Some(7));
    }

    #[test]
    fn rejects_size_mismatch_on_a_checked_code() {
        let mut b = Builder::with_capacity(64);
        b.push_bytes(1, &[1, 2, 3]).unwrap();
        let bytes = b.into_bytes();
        assert!(parse(&bytes, &WANT).is_err());
    }

    #[test]
    fn rejects_trailing_subheader_remnant() {
        let mut buf = vec![0u8; 0];
        buf.extend_from_slice(&[1, 2, 3]);
        assert!(parse(&buf, &WANT).is_err());
    }

    #[test]
    fn nested_group_round_trips() {
        let mut b = Builder::with_capacity(64);
        let start = b.open_nested(2).unwrap();
        b.push_u32(1, 42).unwrap();
        b.close_nested(start);
        let bytes = b.into_bytes();
        let set = parse(&bytes, &WANT).unwrap();
        let inner = set.get(2).unwrap();
        let inner_set = parse(inner, &WANT).unwrap();
        assert_eq!(inner_set.get_u32(1), Some(42));
    }

    #[test]
    fn multipath_entries_round_trip_in_order() {
        let mut b = Builder::with_capacity(128);
        let nh1 = b.open_nexthop(0, 1, 3).unwrap();
        b.push_ip4(1, Ipv4Addr::new(10, 1, 1, 1)).unwrap();
        b.close_nexthop(nh1);
        let nh2 = b.open_nexthop(ONLINK, 2, 4).unwrap();
        b.push_ip4(1, Ipv4Addr::new(10, 1, 1, 2)).unwrap();
        b.close_nexthop(nh2);

        let entries = parse_multipath(&b.into_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].weight, 1);
        assert_eq!(entries[0].ifindex, 3);
        assert_eq!(entries[1].flags & ONLINK, ONLINK);
        assert_eq!(entries[1].ifindex, 4);
    }

    #[test]
    fn builder_overflow_is_reported_not_panicked() {
        let mut b = Builder::with_capacity(8);
        assert!(b.push_u32(1, 1).is_ok());
        assert!(b.push_u32(2, 1).is_err());
    }
}
