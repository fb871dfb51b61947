//! The message envelope shared by link, address and route messages, and
//! the raw framing used to split a receive buffer into one or more
//! messages (a reply datagram can carry several, and a dump streams many
//! datagrams).

use crate::align::align;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Control message types, independent of address family.
pub mod control {
    pub const NOOP: u16 = 1;
    pub const ERROR: u16 = 2;
    pub const DONE: u16 = 3;
    pub const OVERRUN: u16 = 4;
}

pub mod flags {
    pub const REQUEST: u16 = 0x1;
    pub const MULTI: u16 = 0x2;
    pub const ACK: u16 = 0x4;
    pub const ROOT: u16 = 0x100;
    pub const MATCH: u16 = 0x200;
    pub const ATOMIC: u16 = 0x400;
    pub const DUMP: u16 = ROOT | MATCH;
    pub const REPLACE: u16 = 0x100;
    pub const EXCL: u16 = 0x200;
    pub const CREATE: u16 = 0x400;
}

pub const HEADER_LEN: usize = 16;

/// `struct nlmsghdr`. All integer fields are host byte order on the
/// wire, so `bincode`'s native-endian-on-little-endian-hosts encoding
/// is exactly the wire representation on the targets this core cares
/// about.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Header {
    pub len: u32,
    pub typ: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl Header {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(buf).map_err(|_| Error::Truncated)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        bincode::serialize(&self).expect("fixed-size header cannot fail to serialize")
    }
}

/// A message that has passed the envelope check: `body` is everything
/// after the 16-byte header, exactly `header.len - HEADER_LEN` bytes
/// (fixed payload followed by the attribute stream).
pub struct View<'a> {
    pub header: Header,
    pub body: &'a [u8],
}

/// Validates that `raw` contains a complete, non-overrunning message and
/// splits off the header. Declared-length underrun or overrun is a
/// decode-level rejection, logged by the caller.
pub fn checkin(raw: &[u8]) -> Result<View<'_>> {
    if raw.len() < HEADER_LEN {
        return Err(Error::Truncated);
    }
    let header = Header::from_bytes(&raw[..HEADER_LEN])?;
    let declared = header.len as usize;
    if declared < HEADER_LEN || declared > raw.len() {
        return Err(Error::Truncated);
    }
    Ok(View {
        header,
        body: &raw[HEADER_LEN..declared],
    })
}

/// Splits a checked-in body into its family-specific fixed payload and
/// the remaining attribute-area bytes. Returns `None` (to be logged by
/// the caller) if the body is smaller than the fixed payload -- this is
/// the `nl_checkin` underrun case.
pub fn split_fixed(body: &[u8], fixed_len: usize) -> Option<(&[u8], &[u8])> {
    if body.len() < fixed_len {
        return None;
    }
    Some(body.split_at(fixed_len))
}

/// Iterates raw per-message byte slices out of one socket read. Mirrors
/// `NLMSG_OK`/`NLMSG_NEXT`: each message's declared length must fit in
/// what remains of the buffer, and a sub-header remnant is reported as a
/// malformed trailer rather than silently dropped.
pub struct RawMessages<'a> {
    buf: &'a [u8],
}

impl<'a> RawMessages<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for RawMessages<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < HEADER_LEN {
            self.buf = &[];
            return Some(Err(Error::Truncated));
        }
        let header = match Header::from_bytes(&self.buf[..HEADER_LEN]) {
            Ok(h) => h,
            Err(e) => {
                self.buf = &[];
                return Some(Err(e));
            }
        };
        let len = header.len as usize;
        if len < HEADER_LEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(Error::Truncated));
        }
        let msg = &self.buf[..len];
        let consumed = align(len).min(self.buf.len());
        self.buf = &self.buf[consumed..];
        Some(Ok(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: u32, typ: u16) -> Vec<u8> {
        let h = Header {
            len,
            typ,
            flags: 0,
            seq: 7,
            pid: 0,
        };
        let mut bytes = h.to_bytes();
        bytes.resize(len as usize, 0xAA);
        bytes
    }

    #[test]
    fn checkin_rejects_underrun_header() {
        let buf = [0u8; 8];
        assert!(matches!(checkin(&buf), Err(Error::Truncated)));
    }

    #[test]
    fn checkin_rejects_declared_len_past_buffer() {
        let mut buf = sample(64, 24);
        buf.truncate(32);
        assert!(matches!(checkin(&buf), Err(Error::Truncated)));
    }

    #[test]
    fn checkin_splits_header_and_body() {
        let buf = sample(20, 24);
        let view = checkin(&buf).unwrap();
        assert_eq!(view.header.typ, 24);
        assert_eq!(view.body.len(), 4);
    }

    #[test]
    fn raw_messages_iterates_two_aligned_messages() {
        let mut buf = sample(20, 24);
        buf.extend(sample(16, 3));
        let msgs: Vec<_> = RawMessages::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].len(), 20);
        assert_eq!(msgs[1].len(), 16);
    }

    #[test]
    fn raw_messages_flags_a_subheader_remnant() {
        let mut buf = sample(20, 24);
        buf.extend_from_slice(&[1, 2, 3]);
        let result: Result<Vec<_>> = RawMessages::new(&buf).collect();
        assert!(result.is_err());
    }
}
