//! Normalized, address-family-independent representations of what the
//! kernel tells us about links, addresses and routes, plus the
//! collaborator traits that let this crate hand decoded objects to
//! whatever owns the actual interface table, neighbor cache and route
//! table -- none of which are this crate's concern.

use std::net::IpAddr;

pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;
pub const AF_MPLS: u16 = 28;

/// An interface as reported by `RTM_NEWLINK`/`RTM_DELLINK`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    pub kind: LinkKind,
    /// Administratively up (`IFF_UP`).
    pub up: bool,
    /// Carrier present (`IFF_LOWER_UP`); distinct from `up`, which only
    /// reflects administrative state.
    pub running: bool,
    pub multicast: bool,
    pub loopback: bool,
    pub broadcast: bool,
    pub point_to_point: bool,
    pub master: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    Loopback,
    Tunnel,
    Other,
}

/// An address as reported by `RTM_NEWADDR`/`RTM_DELADDR`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IfAddr {
    pub ifindex: u32,
    pub address: IpAddr,
    pub prefix_len: u8,
    /// The other end of a point-to-point or host link, when the kernel
    /// reported one (`IFA_ADDRESS` differing from `IFA_LOCAL`) or when
    /// derived locally for /31, /30 and /127 links.
    pub opposite: Option<IpAddr>,
    pub broadcast: Option<IpAddr>,
    pub scope: AddrScope,
    pub secondary: bool,
    /// Set iff the prefix covers exactly one address and `address`
    /// equals the peer/broadcast slot (no distinct opposite exists).
    pub host: bool,
    /// Set iff the prefix covers exactly one address but `address` is
    /// not the address this host answers to (`IFA_LOCAL` differed from
    /// `IFA_ADDRESS`); `opposite` is then the reported `IFA_ADDRESS`.
    pub peer: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddrScope {
    Host,
    Link,
    Site,
    Universe,
}

impl AddrScope {
    /// Maps a raw `RT_SCOPE_*` byte. Anything unrecognized falls back to
    /// universe, the least restrictive scope, rather than being treated
    /// as an error -- the kernel is free to define scopes this crate
    /// doesn't special-case.
    #[must_use]
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            crate::route::RT_SCOPE_HOST => AddrScope::Host,
            crate::route::RT_SCOPE_LINK => AddrScope::Link,
            crate::route::RT_SCOPE_SITE => AddrScope::Site,
            _ => AddrScope::Universe,
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            AddrScope::Host => crate::route::RT_SCOPE_HOST,
            AddrScope::Link => crate::route::RT_SCOPE_LINK,
            AddrScope::Site => crate::route::RT_SCOPE_SITE,
            AddrScope::Universe => crate::route::RT_SCOPE_UNIVERSE,
        }
    }
}

/// One decoded route as reported by `RTM_NEWROUTE`/`RTM_DELROUTE`, or
/// about to be installed/withdrawn via the same shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub family: u16,
    pub dst: Destination,
    pub table: u32,
    pub protocol: u8,
    pub scope: AddrScope,
    pub disposition: Disposition,
    pub next_hops: Vec<NextHop>,
    pub priority: u32,
    pub metrics: crate::route::metrics::Metrics,
    pub source: RouteSource,
    /// Preferred source address (`RTA_PREFSRC`), used when the kernel
    /// would otherwise pick one on its own.
    pub pref_src: Option<IpAddr>,
    /// Opaque downstream-policy tag (`RTA_FLOW`).
    pub realm: Option<u32>,
}

/// A destination prefix. MPLS destinations carry exactly one label; a
/// multi-label destination is rejected at decode time rather than
/// represented here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Inet { addr: IpAddr, prefix_len: u8 },
    Mpls { label: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Unicast,
    Blackhole,
    Unreachable,
    Prohibit,
    Local,
    Broadcast,
    Anycast,
    Multicast,
}

/// One next hop: a single-path route has exactly one; a multipath route
/// has two or more, decoded from `RTA_MULTIPATH`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NextHop {
    pub ifindex: u32,
    pub gateway: Option<IpAddr>,
    pub weight: u8,
    pub onlink: bool,
    pub mpls_push: Vec<u32>,
}

/// Where a decoded route came from, for the owning table to decide
/// whether it should be learned, ignored, or flagged as a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteSource {
    Kernel,
    Static,
    ThisDaemon,
    Other(u8),
}

impl RouteSource {
    #[must_use]
    pub fn from_protocol(proto: u8) -> Self {
        match proto {
            crate::route::RTPROT_KERNEL => RouteSource::Kernel,
            crate::route::RTPROT_STATIC => RouteSource::Static,
            crate::route::RTPROT_THIS_DAEMON => RouteSource::ThisDaemon,
            other => RouteSource::Other(other),
        }
    }
}

/// Receives decoded interfaces. Implemented by whatever owns the
/// interface table; this crate only produces events.
///
/// `begin_update`/`end_update` bracket one link dump (spec.md §4.8): the
/// owner marks every interface it already knows as stale on
/// `begin_update`, clears the mark as each `interface_updated` arrives,
/// and on `end_update` removes whatever is still marked stale -- the
/// only way to detect an interface the kernel stopped reporting between
/// scans, since a dump carries no explicit "these are all of them"
/// signal beyond its own completion.
pub trait InterfaceSink {
    fn begin_update(&mut self);
    fn interface_updated(&mut self, iface: Interface);
    fn interface_removed(&mut self, index: u32);
    fn end_update(&mut self);
}

/// Receives decoded addresses, keyed by the interface they belong to.
pub trait AddressSink {
    fn address_updated(&mut self, addr: IfAddr);
    fn address_removed(&mut self, ifindex: u32, address: IpAddr, prefix_len: u8);
}

/// What a neighbor cache lookup says about a gateway address: whether
/// it is reachable off the given interface at all, and if so whether
/// that reachability is merely host-local (a route to such a neighbor
/// is not importable -- see `NextHop` invariants in spec.md 3.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborScope {
    HostLocal,
    Reachable,
}

/// Resolves a gateway next hop against the daemon's neighbor cache and
/// interface registry. Kept separate from `InterfaceSink` because a
/// route decoder only ever needs to look interfaces and neighbors up,
/// never to mutate them.
pub trait NeighborCache {
    fn interface_exists(&self, index: u32) -> bool;

    /// Resolves `addr` as reachable over `iface`. `onlink` relaxes the
    /// usual requirement that the neighbor already be known on-link
    /// (the route itself asserts reachability rather than relying on
    /// a previously learned neighbor entry).
    fn resolve(&self, addr: IpAddr, iface: u32, onlink: bool) -> Option<NeighborScope>;
}

/// Receives decoded routes and reports the outcome of install/withdraw
/// requests this crate issued on the owner's behalf.
pub trait RouteSink {
    fn route_updated(&mut self, route: Route);
    fn route_removed(&mut self, dst: Destination, table: u32);
    fn install_result(&mut self, dst: &Destination, outcome: crate::route::InstallOutcome);
}
