//! `nl_send_route`: serializes a [`crate::model::Route`] into an
//! `RTM_NEWROUTE`/`RTM_DELROUTE` request, including the builder/message
//! envelope. Only the reverse direction of `decode` -- turning the
//! kernel's reply into an outcome -- lives outside this module, in
//! [`crate::socket`].

use crate::attr;
use crate::error::Result;
use crate::message::{flags, Header};
use crate::model::{Destination, Disposition, Route, AF_INET, AF_MPLS};
use crate::ratelimit::RateLimiter;
use crate::route::{
    rta, RtMsg, ENCAP_TYPE_MPLS, RTM_DELROUTE, RTM_NEWROUTE, RTN_BLACKHOLE, RTN_PROHIBIT, RTN_UNICAST,
    RTN_UNREACHABLE, RT_SCOPE_UNIVERSE,
};
use crate::socket::Endpoint;

/// What came back for an install/withdraw request. A `SyncError` is not
/// a crate-level `Err`: the daemon's route entry is marked out of sync
/// and retried on the next scan, rather than aborting the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    Ok,
    SyncError(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Install,
    Withdraw,
}

/// Builds, sends and confirms an install/withdraw request on the
/// request endpoint, turning the kernel's ack into an
/// [`InstallOutcome`] rather than a crate-level error -- a rejected
/// route is the owning daemon's problem to retry, not this crate's to
/// abort over. `rl` gates the warn log for a route whose installs keep
/// failing, so a flapping kernel table can't flood the log with the
/// same message every scan.
pub fn send(
    ep: &mut Endpoint,
    route: &Route,
    op: Operation,
    limit: usize,
    rl: &mut RateLimiter,
) -> Result<InstallOutcome> {
    let seq = ep.send_request(|seq| build_request(route, op, seq, limit))?;
    let errno = ep.wait_for_ack(seq)?;
    if errno == 0 {
        return Ok(InstallOutcome::Ok);
    }
    if rl.allow() {
        log::warn!("{op:?} failed for route {:?}: errno {errno}", route.dst);
    }
    Ok(InstallOutcome::SyncError(errno))
}

/// Emits a next hop's outgoing label stack: `RTA_NEWDST` (a label swap)
/// for an MPLS route, or an `RTA_ENCAP`/`RTA_ENCAP_TYPE` pair (MPLS-in-IP
/// encapsulation) for any other family. A mirror of
/// [`crate::route::decode::decode_mpls_push`].
fn push_mpls_push(builder: &mut attr::Builder, family: u16, mpls_push: &[u32]) -> Result<()> {
    if mpls_push.is_empty() {
        return Ok(());
    }
    if family == AF_MPLS {
        builder.push_mpls_stack(rta::NEWDST as u16, mpls_push)?;
    } else {
        let start = builder.open_nested(rta::ENCAP as u16)?;
        builder.push_mpls_stack(rta::DST as u16, mpls_push)?;
        builder.close_nested(start);
        builder.push_u16(rta::ENCAP_TYPE as u16, ENCAP_TYPE_MPLS)?;
    }
    Ok(())
}

/// Builds the full message (header + rtmsg + attributes) for installing
/// or withdrawing `route`, seeded with `seq` for reply correlation.
pub fn build_request(route: &Route, op: Operation, seq: u32, limit: usize) -> Result<Vec<u8>> {
    let kind = match route.disposition {
        Disposition::Unicast => RTN_UNICAST,
        Disposition::Blackhole => RTN_BLACKHOLE,
        Disposition::Unreachable => RTN_UNREACHABLE,
        Disposition::Prohibit => RTN_PROHIBIT,
        other => {
            log::warn!("refusing to install route with disposition {other:?}");
            RTN_UNICAST
        }
    };

    let dst_len = match route.dst {
        Destination::Inet { prefix_len, .. } => prefix_len,
        Destination::Mpls { .. } => 20,
    };

    let rtm = RtMsg {
        family: route.family as u8,
        dst_len,
        src_len: 0,
        tos: 0,
        table: u8::try_from(route.table).unwrap_or(0),
        protocol: crate::route::RTPROT_THIS_DAEMON,
        scope: RT_SCOPE_UNIVERSE,
        kind,
        flags: 0,
    };

    let mut builder = attr::Builder::with_capacity(limit.saturating_sub(crate::message::HEADER_LEN));

    match &route.dst {
        Destination::Inet { addr, .. } => {
            builder.push_ipa(rta::DST as u16, *addr)?;
        }
        Destination::Mpls { label } => {
            builder.push_mpls_stack(rta::DST as u16, &[*label])?;
        }
    }

    if route.table > i32::from(u8::MAX) as u32 {
        builder.push_u32(rta::TABLE as u16, route.table)?;
    }

    if op == Operation::Install {
        if route.priority != 0 {
            builder.push_u32(rta::PRIORITY as u16, route.priority)?;
        }
        if let Some(pref_src) = route.pref_src {
            builder.push_ipa(rta::PREFSRC as u16, pref_src)?;
        }
        if let Some(realm) = route.realm {
            builder.push_u32(rta::FLOW as u16, realm)?;
        }
        crate::route::metrics::build(&mut builder, rta::METRICS as u16, &route.metrics)?;

        match route.next_hops.as_slice() {
            [] => {}
            [hop] => {
                builder.push_u32(rta::OIF as u16, hop.ifindex)?;
                if let Some(gw) = hop.gateway {
                    if route.family == AF_MPLS {
                        builder.push_via(rta::GATEWAY as u16, gw)?;
                    } else {
                        builder.push_ipa(rta::GATEWAY as u16, gw)?;
                    }
                }
                push_mpls_push(&mut builder, route.family, &hop.mpls_push)?;
            }
            hops => {
                let mut mp = attr::Builder::with_capacity(builder.bytes().len().max(256) + 256);
                for hop in hops {
                    let flags = if hop.onlink { attr::ONLINK } else { 0 };
                    let start = mp.open_nexthop(flags, hop.weight, hop.ifindex)?;
                    if let Some(gw) = hop.gateway {
                        if route.family == AF_MPLS {
                            mp.push_via(rta::GATEWAY as u16, gw)?;
                        } else {
                            mp.push_ipa(rta::GATEWAY as u16, gw)?;
                        }
                    }
                    push_mpls_push(&mut mp, route.family, &hop.mpls_push)?;
                    mp.close_nexthop(start);
                }
                builder.push_bytes(rta::MULTIPATH as u16, mp.bytes())?;
            }
        }
    }

    let body_len = std::mem::size_of::<RtMsg>() + builder.len();
    let header = Header {
        len: (crate::message::HEADER_LEN + body_len) as u32,
        typ: if op == Operation::Install {
            RTM_NEWROUTE
        } else {
            RTM_DELROUTE
        },
        flags: flags::REQUEST
            | flags::ACK
            | if op == Operation::Install {
                flags::CREATE | flags::EXCL
            } else {
                0
            },
        seq,
        pid: 0,
    };

    let mut out = header.to_bytes();
    out.extend(bincode::serialize(&rtm).expect("fixed-size rtmsg cannot fail to serialize"));
    out.extend(builder.into_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NeighborCache, NeighborScope, NextHop, RouteSource};
    use crate::route::decode::Context;
    use crate::route::metrics::Metrics;
    use std::net::{IpAddr, Ipv4Addr};

    struct AllowAll;

    impl NeighborCache for AllowAll {
        fn interface_exists(&self, _index: u32) -> bool {
            true
        }

        fn resolve(&self, _addr: IpAddr, _iface: u32, _onlink: bool) -> Option<NeighborScope> {
            Some(NeighborScope::Reachable)
        }
    }

    fn always_registered(_family: u16, _table: u32) -> bool {
        true
    }

    fn ctx() -> Context<'static> {
        Context {
            is_async: false,
            is_delete: false,
            table_registered: &always_registered,
            neighbor: &AllowAll,
        }
    }

    fn sample_route() -> Route {
        Route {
            family: AF_INET,
            dst: Destination::Inet {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)),
                prefix_len: 24,
            },
            table: 254,
            protocol: crate::route::RTPROT_THIS_DAEMON,
            scope: crate::model::AddrScope::Universe,
            disposition: Disposition::Unicast,
            next_hops: vec![NextHop {
                ifindex: 3,
                gateway: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                weight: 1,
                onlink: false,
                mpls_push: Vec::new(),
            }],
            priority: 0,
            metrics: Metrics::default(),
            source: RouteSource::ThisDaemon,
            pref_src: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))),
            realm: Some(7),
        }
    }

    #[test]
    fn install_request_decodes_back_to_an_equivalent_route() {
        let raw = build_request(&sample_route(), Operation::Install, 42, 4096).unwrap();
        let view = crate::message::checkin(&raw).unwrap();
        assert_eq!(view.header.typ, RTM_NEWROUTE);
        assert_eq!(view.header.seq, 42);
        let decoded = crate::route::decode(&view, &ctx()).unwrap().unwrap();
        assert_eq!(decoded.dst, sample_route().dst);
        assert_eq!(decoded.next_hops.len(), 1);
        assert_eq!(decoded.next_hops[0].ifindex, 3);
        assert_eq!(decoded.pref_src, sample_route().pref_src);
        assert_eq!(decoded.realm, sample_route().realm);
    }

    #[test]
    fn withdraw_request_omits_next_hops() {
        let raw = build_request(&sample_route(), Operation::Withdraw, 1, 4096).unwrap();
        let view = crate::message::checkin(&raw).unwrap();
        assert_eq!(view.header.typ, RTM_DELROUTE);
        let withdraw_ctx = Context {
            is_async: true,
            is_delete: true,
            ..ctx()
        };
        let decoded = crate::route::decode(&view, &withdraw_ctx).unwrap().unwrap();
        assert!(decoded.next_hops.is_empty());
        assert_eq!(decoded.pref_src, None);
        assert_eq!(decoded.realm, None);
    }

    #[test]
    fn install_encodes_mpls_in_ip_encapsulation_for_an_inet_route() {
        let mut route = sample_route();
        route.next_hops[0].mpls_push = vec![100, 200];
        let raw = build_request(&route, Operation::Install, 1, 4096).unwrap();
        let view = crate::message::checkin(&raw).unwrap();
        let decoded = crate::route::decode(&view, &ctx()).unwrap().unwrap();
        assert_eq!(decoded.next_hops[0].mpls_push, vec![100, 200]);
    }

    #[test]
    fn multipath_install_preserves_hop_order() {
        let mut route = sample_route();
        route.next_hops = vec![
            NextHop {
                ifindex: 3,
                gateway: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                weight: 1,
                onlink: false,
                mpls_push: Vec::new(),
            },
            NextHop {
                ifindex: 4,
                gateway: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
                weight: 1,
                onlink: true,
                mpls_push: Vec::new(),
            },
        ];
        let raw = build_request(&route, Operation::Install, 1, 4096).unwrap();
        let view = crate::message::checkin(&raw).unwrap();
        let decoded = crate::route::decode(&view, &ctx()).unwrap().unwrap();
        assert_eq!(decoded.next_hops.len(), 2);
        assert_eq!(decoded.next_hops[0].ifindex, 3);
        assert_eq!(decoded.next_hops[1].ifindex, 4);
        assert!(decoded.next_hops[1].onlink);
    }
}
