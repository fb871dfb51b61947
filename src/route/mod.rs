//! Route messages: decoding `RTM_NEWROUTE`/`RTM_DELROUTE` into
//! [`crate::model::Route`], and encoding install/withdraw requests back
//! onto the wire.

pub mod decode;
pub mod encode;
pub mod metrics;

use serde::{Deserialize, Serialize};

pub use decode::decode;
pub use encode::{build_request, send, InstallOutcome, Operation};

/// `struct rtmsg`, the fixed payload shared by every route message
/// regardless of address family.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtMsg {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub kind: u8,
    pub flags: u32,
}

pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;
pub const RTM_GETROUTE: u16 = 26;

/// `rtm_type`: the disposition of a route.
pub const RTN_UNSPEC: u8 = 0;
pub const RTN_UNICAST: u8 = 1;
pub const RTN_LOCAL: u8 = 2;
pub const RTN_BROADCAST: u8 = 3;
pub const RTN_ANYCAST: u8 = 4;
pub const RTN_MULTICAST: u8 = 5;
pub const RTN_BLACKHOLE: u8 = 6;
pub const RTN_UNREACHABLE: u8 = 7;
pub const RTN_PROHIBIT: u8 = 8;

/// `rtm_protocol`: who installed the route.
pub const RTPROT_UNSPEC: u8 = 0;
pub const RTPROT_REDIRECT: u8 = 1;
pub const RTPROT_KERNEL: u8 = 2;
pub const RTPROT_BOOT: u8 = 3;
pub const RTPROT_STATIC: u8 = 4;
/// Protocol tag this daemon stamps onto routes it installs, so it can
/// tell its own routes apart from the kernel's and from static ones on
/// a rescan.
pub const RTPROT_THIS_DAEMON: u8 = 186;

/// `rtm_table`: the well-known table ids; anything else is a real
/// numeric table id carried alongside in `RTA_TABLE`.
pub const RT_TABLE_UNSPEC: u32 = 0;
pub const RT_TABLE_DEFAULT: u32 = 253;
pub const RT_TABLE_MAIN: u32 = 254;
pub const RT_TABLE_LOCAL: u32 = 255;

/// `rtm_scope`.
pub const RT_SCOPE_UNIVERSE: u8 = 0;
pub const RT_SCOPE_SITE: u8 = 200;
pub const RT_SCOPE_LINK: u8 = 253;
pub const RT_SCOPE_HOST: u8 = 254;
pub const RT_SCOPE_NOWHERE: u8 = 255;

pub const RTNH_F_ONLINK: u8 = 4;

/// `LWTUNNEL_ENCAP_MPLS`: the only `RTA_ENCAP_TYPE` value this core
/// understands, for MPLS-in-IP encapsulation on non-MPLS routes. Anything
/// else found on the wire is logged and ignored (spec.md 4.5 step 10).
pub const ENCAP_TYPE_MPLS: u16 = 1;

/// `RTA_*` attribute codes, shared across address families; MPLS reuses
/// `DST`/`OIF`/`GATEWAY` with different payload shapes (see
/// [`decode::WANT_MPLS`]).
pub mod rta {
    pub const UNSPEC: usize = 0;
    pub const DST: usize = 1;
    pub const SRC: usize = 2;
    pub const IIF: usize = 3;
    pub const OIF: usize = 4;
    pub const GATEWAY: usize = 5;
    pub const PRIORITY: usize = 6;
    pub const PREFSRC: usize = 7;
    pub const METRICS: usize = 8;
    pub const MULTIPATH: usize = 9;
    pub const FLOW: usize = 11;
    pub const TABLE: usize = 15;
    pub const VIA: usize = 18;
    pub const NEWDST: usize = 19;
    pub const PREF: usize = 20;
    pub const ENCAP_TYPE: usize = 21;
    pub const ENCAP: usize = 22;
    pub const MAX: usize = 23;
}
