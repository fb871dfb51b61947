//! Link messages: decoding `RTM_NEWLINK`/`RTM_DELLINK` into
//! [`crate::model::Interface`].

use crate::attr::{self, Spec};
use crate::error::Result;
use crate::message;
use crate::model::{Interface, LinkKind};
use serde::{Deserialize, Serialize};

pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_GETLINK: u16 = 18;

/// `struct ifinfomsg`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfInfoMsg {
    pub family: u8,
    pub pad: u8,
    pub kind: u16,
    pub index: i32,
    pub flags: u32,
    pub change: u32,
}

mod ifla {
    pub const UNSPEC: usize = 0;
    pub const ADDRESS: usize = 1;
    pub const BROADCAST: usize = 2;
    pub const IFNAME: usize = 3;
    pub const MTU: usize = 4;
    pub const LINK: usize = 5;
    pub const MASTER: usize = 10;
    pub const WIRELESS: usize = 11;
    pub const LINKINFO: usize = 18;
    pub const MAX: usize = 19;
}

const WANT: [Spec; ifla::MAX] = {
    let mut t = [Spec::UNDEFINED; ifla::MAX];
    t[ifla::ADDRESS] = Spec::unchecked();
    t[ifla::BROADCAST] = Spec::unchecked();
    t[ifla::IFNAME] = Spec::unchecked();
    t[ifla::MTU] = Spec::checked(4);
    t[ifla::LINK] = Spec::checked(4);
    t[ifla::MASTER] = Spec::checked(4);
    t[ifla::WIRELESS] = Spec::unchecked();
    t[ifla::LINKINFO] = Spec::unchecked();
    t
};

const IFF_UP: u32 = 1 << 0;
const IFF_BROADCAST: u32 = 1 << 1;
const IFF_LOOPBACK: u32 = 1 << 3;
const IFF_POINTOPOINT: u32 = 1 << 4;
const IFF_MULTICAST: u32 = 1 << 12;
/// Carrier state, as opposed to `IFF_UP`'s administrative state: a link
/// can be up but have no carrier (cable unplugged), and vice versa
/// during a brief down/up transition.
const IFF_LOWER_UP: u32 = 1 << 16;

/// ARPHRD_* values this crate tells apart; everything else is `Other`.
const ARPHRD_ETHER: u16 = 1;
const ARPHRD_LOOPBACK: u16 = 772;
const ARPHRD_TUNNEL: u16 = 768;
const ARPHRD_SIT: u16 = 776;
const ARPHRD_IPGRE: u16 = 778;

pub fn decode(view: &message::View<'_>) -> Result<Option<Interface>> {
    let Some((fixed, attrs)) = message::split_fixed(view.body, std::mem::size_of::<IfInfoMsg>()) else {
        log::warn!("link message shorter than ifinfomsg header");
        return Ok(None);
    };
    let ifi: IfInfoMsg = bincode::deserialize(fixed).map_err(|_| crate::error::Error::Truncated)?;

    let set = match attr::parse(attrs, &WANT) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("malformed link attributes: {e}");
            return Ok(None);
        }
    };

    let name_bytes = set.get(ifla::IFNAME).filter(|b| b.len() >= 2);
    let mtu = set.get_u32(ifla::MTU);
    let (Some(name_bytes), Some(mtu)) = (name_bytes, mtu) else {
        if set.get(ifla::WIRELESS).is_some() {
            log::debug!("wireless-only link message without name/MTU, ignoring");
        } else {
            log::warn!("link message missing required IFLA_IFNAME/IFLA_MTU, skipping");
        }
        return Ok(None);
    };
    let name = decode_cstr(name_bytes);

    let kind = match ifi.kind {
        ARPHRD_ETHER => LinkKind::Ethernet,
        ARPHRD_LOOPBACK => LinkKind::Loopback,
        ARPHRD_TUNNEL | ARPHRD_SIT | ARPHRD_IPGRE => LinkKind::Tunnel,
        _ => LinkKind::Other,
    };

    Ok(Some(Interface {
        index: ifi.index as u32,
        name,
        mtu,
        kind,
        up: ifi.flags & IFF_UP != 0,
        running: ifi.flags & IFF_LOWER_UP != 0,
        multicast: ifi.flags & IFF_MULTICAST != 0,
        loopback: ifi.flags & IFF_LOOPBACK != 0,
        broadcast: ifi.flags & IFF_BROADCAST != 0,
        point_to_point: ifi.flags & IFF_POINTOPOINT != 0,
        master: set.get_u32(ifla::MASTER),
    }))
}

fn decode_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
