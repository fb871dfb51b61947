//! `nl_parse_route`: turns one `RTM_NEWROUTE`/`RTM_DELROUTE` body into a
//! [`crate::model::Route`], or a logged rejection.
//!
//! The steps below follow the fixed order: validate the family, parse
//! the attribute set for that family, resolve the destination, resolve
//! the next hop(s), then the remaining scalar fields. Each step can
//! reject the message (decode-level, logged, not fatal); there is no
//! partial result -- a rejected route is simply absent from the scan.

use crate::attr::{self, Spec};
use crate::error::Result;
use crate::message;
use crate::model::{
    AddrScope, Destination, Disposition, NeighborCache, NeighborScope, NextHop, Route, RouteSource,
    AF_INET, AF_INET6, AF_MPLS,
};
use crate::route::{metrics, rta, RtMsg, RTPROT_UNSPEC, RTPROT_THIS_DAEMON};
use std::net::IpAddr;

const WANT_INET: [Spec; rta::MAX] = {
    let mut t = [Spec::UNDEFINED; rta::MAX];
    t[rta::DST] = Spec::unchecked();
    t[rta::SRC] = Spec::unchecked();
    t[rta::IIF] = Spec::checked(4);
    t[rta::OIF] = Spec::checked(4);
    t[rta::GATEWAY] = Spec::unchecked();
    t[rta::PRIORITY] = Spec::checked(4);
    t[rta::PREFSRC] = Spec::unchecked();
    t[rta::METRICS] = Spec::unchecked();
    t[rta::MULTIPATH] = Spec::unchecked();
    t[rta::FLOW] = Spec::checked(4);
    t[rta::TABLE] = Spec::checked(4);
    t[rta::VIA] = Spec::unchecked();
    t[rta::NEWDST] = Spec::unchecked();
    t[rta::PREF] = Spec::checked(1);
    t[rta::ENCAP_TYPE] = Spec::checked(2);
    t[rta::ENCAP] = Spec::unchecked();
    t
};

/// MPLS's `RTA_DST` is deliberately left unchecked for size even though
/// it is "just" a label stack: a kernel can in principle report more
/// than one label, and this crate only supports single-label
/// destinations, so the size is validated after decode (see below)
/// rather than at the attribute-table level, producing a proper
/// rejection-with-reason instead of a blanket size-mismatch drop.
const WANT_MPLS: [Spec; rta::MAX] = {
    let mut t = [Spec::UNDEFINED; rta::MAX];
    t[rta::DST] = Spec::unchecked();
    t[rta::OIF] = Spec::checked(4);
    t[rta::GATEWAY] = Spec::unchecked();
    t[rta::VIA] = Spec::unchecked();
    t[rta::MULTIPATH] = Spec::unchecked();
    t[rta::NEWDST] = Spec::unchecked();
    t
};

/// Context the route decoder needs beyond the raw message itself: the
/// set of `(family, table)` pairs this process actually owns, whether
/// the message arrived off the async multicast socket rather than a
/// scan dump, whether it's a removal rather than an add/update, and the
/// daemon's neighbor cache for gateway reachability.
pub struct Context<'a> {
    pub is_async: bool,
    pub is_delete: bool,
    pub table_registered: &'a dyn Fn(u16, u32) -> bool,
    pub neighbor: &'a dyn NeighborCache,
}

pub fn decode(view: &message::View<'_>, ctx: &Context<'_>) -> Result<Option<Route>> {
    let Some((fixed, attrs)) = message::split_fixed(view.body, std::mem::size_of::<RtMsg>()) else {
        log::warn!("route message shorter than rtmsg header");
        return Ok(None);
    };
    let rtm: RtMsg = bincode::deserialize(fixed).map_err(|_| crate::error::Error::Truncated)?;

    let family = u16::from(rtm.family);
    let want = match family {
        AF_INET | AF_INET6 => &WANT_INET,
        AF_MPLS => &WANT_MPLS,
        other => {
            log::debug!("route with unsupported address family {other}, skipping");
            return Ok(None);
        }
    };
    let set = match attr::parse(attrs, want) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("malformed route attributes: {e}");
            return Ok(None);
        }
    };

    if set.get(rta::IIF).is_some() {
        log::debug!("route with incoming interface set, skipping");
        return Ok(None);
    }
    if rtm.tos != 0 {
        log::debug!("route with non-zero TOS {}, skipping", rtm.tos);
        return Ok(None);
    }
    if ctx.is_delete && !ctx.is_async {
        log::debug!("route delete arrived during a bulk scan, skipping");
        return Ok(None);
    }
    if rtm.protocol == RTPROT_UNSPEC {
        log::debug!("route with unspecified protocol, skipping");
        return Ok(None);
    }
    if rtm.protocol == crate::route::RTPROT_KERNEL {
        log::debug!("route installed by the kernel itself, skipping");
        return Ok(None);
    }
    if ctx.is_async && rtm.protocol == RTPROT_THIS_DAEMON {
        log::debug!("async notification echoes our own install, skipping");
        return Ok(None);
    }

    let table = set.get_u32(rta::TABLE).unwrap_or(u32::from(rtm.table));
    if !(ctx.table_registered)(family, table) {
        log::debug!("route in unregistered table ({family}, {table}), dropping");
        return Ok(None);
    }

    let Some(dst) = decode_destination(family, rtm.dst_len, &set) else {
        return Ok(None);
    };
    if !dest_is_importable(&dst) {
        log::debug!("route destination is not a regular, sufficiently-scoped address, skipping");
        return Ok(None);
    }

    let Some(disposition) = map_disposition(rtm.kind) else {
        log::debug!("route with unsupported rtm_type {}, skipping", rtm.kind);
        return Ok(None);
    };

    let next_hops = match decode_next_hops(family, &set, ctx.neighbor) {
        Ok(Some(hops)) => hops,
        Ok(None) => return Ok(None),
        Err(e) => {
            log::warn!("malformed multipath next hops: {e}");
            return Ok(None);
        }
    };
    if !ctx.is_delete && disposition == Disposition::Unicast && next_hops.is_empty() {
        log::warn!("unicast route has no usable next hop, rejecting");
        return Ok(None);
    }

    let metrics = match set.get(rta::METRICS) {
        Some(buf) => match metrics::parse(buf) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("malformed route metrics: {e}");
                return Ok(None);
            }
        },
        None => metrics::Metrics::default(),
    };

    Ok(Some(Route {
        family,
        dst,
        table,
        protocol: rtm.protocol,
        scope: AddrScope::from_wire(rtm.scope),
        disposition,
        next_hops,
        priority: set.get_u32(rta::PRIORITY).unwrap_or(0),
        metrics,
        source: RouteSource::from_protocol(rtm.protocol),
        pref_src: set.get_ipa(rta::PREFSRC),
        realm: set.get_u32(rta::FLOW),
    }))
}

/// Rejects destinations the daemon never wants mirrored into its route
/// table: multicast/broadcast targets, and (for non-default prefixes)
/// destinations whose own scope is link-local or narrower. The
/// all-zeros default route is always importable regardless of prefix
/// length.
fn dest_is_importable(dst: &Destination) -> bool {
    let Destination::Inet { addr, prefix_len } = dst else {
        return true;
    };
    if *prefix_len == 0 {
        return true;
    }
    match addr {
        IpAddr::V4(a) => !(a.is_multicast() || a.is_broadcast() || a.is_link_local()),
        IpAddr::V6(a) => !(a.is_multicast() || crate::addr::is_unicast_link_local(*a)),
    }
}

fn decode_destination<const N: usize>(
    family: u16,
    dst_len: u8,
    set: &attr::Set<'_, N>,
) -> Option<Destination> {
    if family == AF_MPLS {
        let buf = set.get(rta::DST)?;
        let labels = metrics::parse_mpls_stack(buf).ok()?;
        if labels.len() != 1 {
            log::warn!("MPLS route with {} labels, only single-label destinations are supported", labels.len());
            return None;
        }
        return Some(Destination::Mpls { label: labels[0] });
    }
    let addr = set.get_ipa(rta::DST).unwrap_or(match family {
        AF_INET => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        _ => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    });
    Some(Destination::Inet {
        addr,
        prefix_len: dst_len,
    })
}

const WANT_ENCAP_MPLS: [Spec; rta::DST + 1] = {
    let mut t = [Spec::UNDEFINED; rta::DST + 1];
    t[rta::DST] = Spec::unchecked();
    t
};

/// The outgoing label stack a next hop should push, read from `RTA_NEWDST`
/// for MPLS routes (a label swap) or from the `RTA_ENCAP`/`RTA_ENCAP_TYPE`
/// pair for IP routes (MPLS-in-IP encapsulation) -- see spec.md 4.5 step
/// 10 and 6.4.
pub(crate) fn decode_mpls_push<const N: usize>(family: u16, set: &attr::Set<'_, N>) -> Vec<u32> {
    if family == AF_MPLS {
        return set
            .get(rta::NEWDST)
            .and_then(|b| metrics::parse_mpls_stack(b).ok())
            .unwrap_or_default();
    }
    let Some(encap_type) = set.get_u16(rta::ENCAP_TYPE) else {
        return Vec::new();
    };
    if encap_type != crate::route::ENCAP_TYPE_MPLS {
        log::debug!("route with unknown encapsulation type {encap_type}, ignoring");
        return Vec::new();
    }
    let Some(encap) = set.get(rta::ENCAP) else {
        return Vec::new();
    };
    let Ok(inner) = attr::parse(encap, &WANT_ENCAP_MPLS) else {
        return Vec::new();
    };
    inner
        .get(rta::DST)
        .and_then(|b| metrics::parse_mpls_stack(b).ok())
        .unwrap_or_default()
}

/// `::/96`: an IPv4-compatible IPv6 address, the obsolete 6to4-style
/// tunnel encoding. Such a gateway is silently dropped from the
/// next-hop list rather than resolved against the neighbor cache.
fn is_6to4_tunnel_gateway(addr: IpAddr) -> bool {
    matches!(addr, IpAddr::V6(a) if a.segments()[..6] == [0, 0, 0, 0, 0, 0])
}

/// Validates one next hop's interface and (when present) gateway
/// against the daemon's neighbor cache. Returns `Ok(None)` to signal
/// "drop this next hop" (unresolvable interface -- the whole route
/// import aborts; a 6to4-style gateway -- just this hop is discarded).
fn validate_hop(
    ifindex: u32,
    gateway: Option<IpAddr>,
    onlink: bool,
    neighbor: &dyn NeighborCache,
) -> Result<Option<Option<IpAddr>>> {
    if !neighbor.interface_exists(ifindex) {
        log::error!("route next hop references unknown interface {ifindex}");
        return Ok(None);
    }
    let Some(gw) = gateway else {
        return Ok(Some(None));
    };
    if is_6to4_tunnel_gateway(gw) {
        return Ok(Some(None));
    }
    match neighbor.resolve(gw, ifindex, onlink) {
        Some(NeighborScope::Reachable) => Ok(Some(Some(gw))),
        Some(NeighborScope::HostLocal) => {
            log::error!("route gateway {gw} is only host-local, rejecting");
            Ok(None)
        }
        None => {
            log::error!("route gateway {gw} does not resolve to a known neighbor, rejecting");
            Ok(None)
        }
    }
}

fn decode_next_hops<const N: usize>(
    family: u16,
    set: &attr::Set<'_, N>,
    neighbor: &dyn NeighborCache,
) -> Result<Option<Vec<NextHop>>> {
    if let Some(buf) = set.get(rta::MULTIPATH) {
        let entries = attr::parse_multipath(buf)?;
        let mut hops = Vec::with_capacity(entries.len());
        for entry in entries {
            let inner = attr::parse(entry.attrs, want_for(family))?;
            let onlink = entry.flags & attr::ONLINK != 0;
            let gateway = inner.get_ipa(rta::GATEWAY).or_else(|| inner.get_via(rta::VIA));
            let Some(gateway) = validate_hop(entry.ifindex, gateway, onlink, neighbor)? else {
                return Ok(None);
            };
            hops.push(NextHop {
                ifindex: entry.ifindex,
                gateway,
                weight: entry.weight,
                onlink,
                mpls_push: decode_mpls_push(family, &inner),
            });
        }
        return Ok(Some(hops));
    }

    let gateway = set.get_ipa(rta::GATEWAY).or_else(|| set.get_via(rta::VIA));
    let oif = set.get_u32(rta::OIF);
    let Some(ifindex) = oif else {
        return Ok(Some(Vec::new()));
    };
    let Some(gateway) = validate_hop(ifindex, gateway, false, neighbor)? else {
        return Ok(None);
    };
    let mpls_push = decode_mpls_push(family, set);
    Ok(Some(vec![NextHop {
        ifindex,
        gateway,
        weight: 1,
        onlink: false,
        mpls_push,
    }]))
}

fn want_for(family: u16) -> &'static [Spec; rta::MAX] {
    if family == AF_MPLS {
        &WANT_MPLS
    } else {
        &WANT_INET
    }
}

/// Every `RTN_*` value this crate knows about maps to its own
/// `Disposition` arm; there is no fallthrough between unicast and
/// blackhole or any other pair, so a route's installed behavior can
/// never be silently reinterpreted as a different one.
fn map_disposition(rtm_type: u8) -> Option<Disposition> {
    use crate::route::*;
    match rtm_type {
        RTN_UNICAST => Some(Disposition::Unicast),
        RTN_BLACKHOLE => Some(Disposition::Blackhole),
        RTN_UNREACHABLE => Some(Disposition::Unreachable),
        RTN_PROHIBIT => Some(Disposition::Prohibit),
        RTN_LOCAL => Some(Disposition::Local),
        RTN_BROADCAST => Some(Disposition::Broadcast),
        RTN_ANYCAST => Some(Disposition::Anycast),
        RTN_MULTICAST => Some(Disposition::Multicast),
        _ => None,
    }
}
