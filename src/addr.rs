//! Address messages: decoding `RTM_NEWADDR`/`RTM_DELADDR` into
//! [`crate::model::IfAddr`], including the host/peer and broadcast
//! derivation the kernel leaves to the listener for prefix lengths it
//! doesn't special-case itself.

use crate::attr::{self, Spec};
use crate::error::Result;
use crate::message;
use crate::model::{AddrScope, IfAddr, AF_INET, AF_INET6};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const RTM_NEWADDR: u16 = 20;
pub const RTM_DELADDR: u16 = 21;
pub const RTM_GETADDR: u16 = 22;

/// `struct ifaddrmsg`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfAddrMsg {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
}

mod ifa {
    pub const ADDRESS: usize = 1;
    pub const LOCAL: usize = 2;
    pub const LABEL: usize = 3;
    pub const BROADCAST: usize = 4;
    pub const ANYCAST: usize = 5;
    pub const CACHEINFO: usize = 6;
    pub const FLAGS: usize = 8;
    pub const MAX: usize = 9;
}

const IFA_F_SECONDARY: u8 = 0x01;

fn want(family: u16) -> [Spec; ifa::MAX] {
    let addr_size: u16 = if family == AF_INET6 { 16 } else { 4 };
    let mut t = [Spec::UNDEFINED; ifa::MAX];
    t[ifa::ADDRESS] = Spec::checked(addr_size);
    t[ifa::LOCAL] = Spec::checked(addr_size);
    t[ifa::LABEL] = Spec::unchecked();
    t[ifa::BROADCAST] = Spec::checked(addr_size);
    t[ifa::ANYCAST] = Spec::checked(addr_size);
    t[ifa::CACHEINFO] = Spec::unchecked();
    t[ifa::FLAGS] = Spec::checked(4);
    t
}

pub fn decode(view: &message::View<'_>) -> Result<Option<IfAddr>> {
    let Some((fixed, attrs)) = message::split_fixed(view.body, std::mem::size_of::<IfAddrMsg>()) else {
        log::warn!("address message shorter than ifaddrmsg header");
        return Ok(None);
    };
    let ifa_msg: IfAddrMsg = bincode::deserialize(fixed).map_err(|_| crate::error::Error::Truncated)?;

    let family = u16::from(ifa_msg.family);
    if family != AF_INET && family != AF_INET6 {
        log::debug!("address with unsupported family {family}, skipping");
        return Ok(None);
    }

    let table = want(family);
    let set = match attr::parse(attrs, &table) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("malformed address attributes: {e}");
            return Ok(None);
        }
    };

    let local = decode_addr(family, set.get(ifa::LOCAL));
    let reported = decode_addr(family, set.get(ifa::ADDRESS));
    // IFA_LOCAL and IFA_ADDRESS are both required for IPv4; for IPv6
    // IFA_LOCAL may be absent and defaults to IFA_ADDRESS.
    let address = if family == AF_INET {
        let (Some(l), Some(_)) = (local, reported) else {
            log::warn!("IPv4 address message missing IFA_LOCAL or IFA_ADDRESS, skipping");
            return Ok(None);
        };
        l
    } else {
        let Some(r) = reported else {
            log::warn!("IPv6 address message missing IFA_ADDRESS, skipping");
            return Ok(None);
        };
        local.unwrap_or(r)
    };

    let Some(scope) = classify_scope(address) else {
        log::warn!("address {address} has no classifiable scope, skipping");
        return Ok(None);
    };

    let flags = set.get_u32(ifa::FLAGS).map_or(ifa_msg.flags, |f| f as u8);
    let secondary = flags & IFA_F_SECONDARY != 0;

    let max_len = max_prefix_len(address);
    let single_address = ifa_msg.prefix_len >= max_len;

    let (peer, opposite) = match (local, reported) {
        (Some(l), Some(r)) if l != r => (single_address, Some(r)),
        _ => (false, derive_opposite(address, ifa_msg.prefix_len)),
    };
    let host = single_address && !peer;

    let derived_broadcast = derive_broadcast(address, ifa_msg.prefix_len);
    let broadcast = match decode_addr(family, set.get(ifa::BROADCAST)) {
        Some(reported) => {
            let network = derive_network(address, ifa_msg.prefix_len);
            if Some(reported) == network || Some(reported) == derived_broadcast {
                Some(reported)
            } else {
                log::warn!(
                    "interface {} reported invalid broadcast address {reported} for {address}/{}, correcting to {derived_broadcast:?}",
                    ifa_msg.index, ifa_msg.prefix_len
                );
                derived_broadcast
            }
        }
        None => derived_broadcast,
    };

    Ok(Some(IfAddr {
        ifindex: ifa_msg.index,
        address,
        prefix_len: ifa_msg.prefix_len,
        opposite,
        broadcast,
        scope,
        secondary,
        host,
        peer,
    }))
}

/// The address width in bits: 32 for IPv4, 128 for IPv6. A decoded prefix
/// length past this is invalid; the caller (spec.md 4.4) treats such a
/// message as a removal regardless of whether it arrived as
/// `RTM_NEWADDR` or `RTM_DELADDR`.
#[must_use]
pub fn max_prefix_len(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn decode_addr(family: u16, bytes: Option<&[u8]>) -> Option<IpAddr> {
    let bytes = bytes?;
    match family {
        AF_INET => Some(IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(bytes).ok()?))),
        AF_INET6 => Some(IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(bytes).ok()?))),
        _ => None,
    }
}

/// On a two-address link (IPv4 /31, IPv6 /127) the kernel does not
/// always report a distinct peer: both ends differ only in the last
/// bit, so it can be derived instead of requiring it on the wire. A
/// /30 IPv4 link has two usable host addresses in addition to its
/// network and broadcast slots; the opposite there is the other usable
/// host address, found by flipping both low bits and excluding the
/// network/broadcast addresses themselves.
fn derive_opposite(addr: IpAddr, prefix_len: u8) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(a) if prefix_len == 31 => {
            let bits = u32::from(a) ^ 1;
            Some(IpAddr::V4(Ipv4Addr::from(bits)))
        }
        IpAddr::V4(a) if prefix_len == 30 => {
            let bits = u32::from(a);
            let host = bits & 0b11;
            if host == 0 || host == 0b11 {
                return None;
            }
            Some(IpAddr::V4(Ipv4Addr::from((bits & !0b11) | (host ^ 0b11))))
        }
        IpAddr::V6(a) if prefix_len == 127 => {
            let bits = u128::from(a) ^ 1;
            Some(IpAddr::V6(Ipv6Addr::from(bits)))
        }
        _ => None,
    }
}

/// Recomputes an address's scope from the address value itself, since
/// the wire's `ifa_scope`/`rtm_scope` byte is whatever the kernel
/// happened to store and is not trustworthy on its own (spec.md 4.4).
/// Returns `None` for values this crate has no classification for
/// (e.g. a multicast address reported as an interface address), which
/// rejects the address entirely rather than guessing.
fn classify_scope(addr: IpAddr) -> Option<AddrScope> {
    match addr {
        IpAddr::V4(a) => {
            if a.is_multicast() || a.is_broadcast() || a.is_unspecified() {
                None
            } else if a.is_loopback() {
                Some(AddrScope::Host)
            } else if a.is_link_local() {
                Some(AddrScope::Link)
            } else {
                Some(AddrScope::Universe)
            }
        }
        IpAddr::V6(a) => {
            if a.is_multicast() || a.is_unspecified() {
                None
            } else if a.is_loopback() {
                Some(AddrScope::Host)
            } else if is_unicast_link_local(a) {
                Some(AddrScope::Link)
            } else if is_unique_local(a) {
                Some(AddrScope::Site)
            } else {
                Some(AddrScope::Universe)
            }
        }
    }
}

/// `fe80::/10`.
pub(crate) fn is_unicast_link_local(a: Ipv6Addr) -> bool {
    let segs = a.segments();
    segs[0] & 0xffc0 == 0xfe80
}

/// `fc00::/7` (unique local addresses).
fn is_unique_local(a: Ipv6Addr) -> bool {
    let segs = a.segments();
    segs[0] & 0xfe00 == 0xfc00
}

/// Derives the subnet broadcast address for ordinary IPv4 subnets (all
/// host bits set). Not meaningful for IPv6 or for /31 and /32, which
/// have no broadcast address.
fn derive_broadcast(addr: IpAddr, prefix_len: u8) -> Option<IpAddr> {
    let IpAddr::V4(a) = addr else { return None };
    if prefix_len >= 31 {
        return None;
    }
    let host_bits = 32 - u32::from(prefix_len);
    let mask = if host_bits == 32 { 0 } else { !0u32 << host_bits };
    let broadcast = u32::from(a) | !mask;
    Some(IpAddr::V4(Ipv4Addr::from(broadcast)))
}

/// Derives the IPv4 network address (host bits cleared), the other
/// value a reported `IFA_BROADCAST` is allowed to equal (spec.md §3.4).
fn derive_network(addr: IpAddr, prefix_len: u8) -> Option<IpAddr> {
    let IpAddr::V4(a) = addr else { return None };
    let host_bits = 32 - u32::from(prefix_len);
    let mask = if host_bits >= 32 { 0 } else { !0u32 << host_bits };
    Some(IpAddr::V4(Ipv4Addr::from(u32::from(a) & mask)))
}
