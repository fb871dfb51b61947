//! The rtnetlink transport: one raw `AF_NETLINK`/`NETLINK_ROUTE` socket
//! per [`Endpoint`], each playing one of three roles --
//!
//! - `scan`: issues `NLM_F_DUMP` requests and reads the multi-message
//!   reply until `NLMSG_DONE`.
//! - `request`: issues a single install/withdraw request and waits for
//!   its `NLMSG_ERROR` ack.
//! - `async`: subscribed to the kernel's multicast groups, never blocks,
//!   drained opportunistically between scans.
//!
//! All three share the same envelope handling (sequence correlation,
//! discarding replies not from the kernel) -- only how a caller drives
//! them differs, which is why it's one type with three constructors
//! rather than three types.

use crate::error::{Error, Result};
use crate::message::{self, control, Header};
use nix::sys::socket::{
    bind, recv, send, setsockopt, socket, sockopt, AddressFamily, MsgFlags, NetlinkAddr,
    SockFlag, SockProtocol, SockType,
};
use nix::unistd::getpid;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{SystemTime, UNIX_EPOCH};

pub const RTMGRP_LINK: u32 = 0x1;
pub const RTMGRP_IPV4_IFADDR: u32 = 0x10;
pub const RTMGRP_IPV4_ROUTE: u32 = 0x40;
pub const RTMGRP_IPV6_IFADDR: u32 = 0x100;
pub const RTMGRP_IPV6_ROUTE: u32 = 0x400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Scan,
    Request,
    Async,
}

pub struct Endpoint {
    fd: RawFd,
    pid: u32,
    role: Role,
    seq: u32,
    recv_buf: Vec<u8>,
}

impl Endpoint {
    fn open(role: Role, groups: u32) -> Result<Self> {
        let flags = if role == Role::Async {
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK
        } else {
            SockFlag::SOCK_CLOEXEC
        };
        let fd = socket(AddressFamily::Netlink, SockType::Raw, flags, SockProtocol::NetlinkRoute)
            .map_err(Error::CreateSocket)?;

        let pid = getpid().as_raw() as u32;
        let addr = NetlinkAddr::new(pid, groups);
        bind(fd, &addr).map_err(Error::BindSocket)?;

        if groups != 0 {
            setsockopt(fd, sockopt::RcvBuf, &(256usize * 1024))
                .map_err(Error::JoinGroups)?;
        }

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);

        Ok(Self {
            fd,
            pid,
            role,
            seq: seed,
            recv_buf: vec![0u8; 64 * 1024],
        })
    }

    pub fn scan() -> Result<Self> {
        Self::open(Role::Scan, 0)
    }

    pub fn request() -> Result<Self> {
        Self::open(Role::Request, 0)
    }

    pub fn asynchronous() -> Result<Self> {
        let groups = RTMGRP_LINK
            | RTMGRP_IPV4_IFADDR
            | RTMGRP_IPV4_ROUTE
            | RTMGRP_IPV6_IFADDR
            | RTMGRP_IPV6_ROUTE;
        Self::open(Role::Async, groups)
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn send_request(&mut self, build: impl FnOnce(u32) -> Result<Vec<u8>>) -> Result<u32> {
        let seq = self.next_seq();
        let bytes = build(seq)?;
        send(self.fd, &bytes, MsgFlags::empty()).map_err(Error::Send)?;
        Ok(seq)
    }

    /// Reads one datagram with `MSG_TRUNC` so the kernel reports the
    /// full datagram length even when it didn't fit in `recv_buf` --
    /// without that flag a short `recv` looks identical to an ordinary
    /// short datagram, and a truncated message silently loses its tail
    /// attributes instead of failing the fatal invariant spec.md §4.2
    /// requires.
    fn recv_datagram(&mut self) -> Result<Option<&[u8]>> {
        match recv(self.fd, &mut self.recv_buf, MsgFlags::MSG_TRUNC) {
            Ok(n) if n > self.recv_buf.len() => Err(Error::Truncated),
            Ok(n) => Ok(Some(&self.recv_buf[..n])),
            Err(nix::Error::EAGAIN) if self.role == Role::Async => Ok(None),
            Err(e) => Err(Error::Recv(e)),
        }
    }

    /// Reads one reply datagram and hands each contained message to
    /// `handle`, stopping at `NLMSG_DONE` or once the buffer is
    /// exhausted. Replies not sent by the kernel (`pid != 0`) are
    /// silently discarded -- they belong to some other netlink listener
    /// sharing the multicast group, never to us.
    pub fn drain_one<F>(&mut self, mut handle: F) -> Result<bool>
    where
        F: FnMut(&Header, &[u8]),
    {
        let Some(datagram) = self.recv_datagram()? else {
            return Ok(false);
        };
        let mut done = false;
        for msg in message::RawMessages::new(datagram) {
            let raw = msg?;
            let view = message::checkin(raw)?;
            if view.header.pid != 0 {
                log::debug!("discarding netlink message from non-kernel pid {}", view.header.pid);
                continue;
            }
            if view.header.typ == control::DONE {
                done = true;
                continue;
            }
            if view.header.typ == control::OVERRUN {
                log::warn!("netlink receive buffer overrun, some updates were lost");
                continue;
            }
            handle(&view.header, view.body);
        }
        Ok(done)
    }

    /// Drives a dump to completion, calling `handle` for every message
    /// whose sequence number matches `seq`. Messages carrying a
    /// different sequence are logged and skipped rather than treated as
    /// an error -- the kernel can interleave unrelated notifications on
    /// the same socket.
    pub fn drain_dump<F>(&mut self, seq: u32, mut handle: F) -> Result<()>
    where
        F: FnMut(&Header, &[u8]),
    {
        loop {
            let mut aborted = false;
            let finished = self.drain_one(|header, body| {
                if header.seq != seq {
                    log::warn!("skipping out-of-sequence reply {} (expected {})", header.seq, seq);
                    return;
                }
                if header.typ == control::ERROR {
                    let code = body
                        .get(..4)
                        .map_or(-1, |b| i32::from_ne_bytes(b.try_into().unwrap()));
                    log::error!("dump aborted by the kernel: error {code}");
                    aborted = true;
                    return;
                }
                handle(header, body);
            })?;
            if finished || aborted {
                return Ok(());
            }
        }
    }

    /// Waits for the `NLMSG_ERROR` ack to a request sent with `seq`.
    /// The kernel's ack carries a zero error code for success and a
    /// negative `errno` otherwise -- both are reported through
    /// [`crate::route::InstallOutcome`], never as a crate-level error.
    pub fn wait_for_ack(&mut self, seq: u32) -> Result<i32> {
        loop {
            let mut found = None;
            self.drain_one(|header, body| {
                if header.seq != seq || header.typ != control::ERROR {
                    log::warn!(
                        "unexpected reply (type {}, seq {}) while waiting for ack to {}",
                        header.typ,
                        header.seq,
                        seq
                    );
                    return;
                }
                if body.len() >= 4 {
                    found = Some(i32::from_ne_bytes(body[..4].try_into().unwrap()));
                }
            })?;
            if let Some(code) = found {
                return Ok(code);
            }
        }
    }

    /// Reads and dispatches exactly one datagram's worth of messages
    /// from an async endpoint without blocking, then returns -- never
    /// draining the whole queue in one call, so a burst of notifications
    /// can't stall the scan loop this is interleaved with. A quiet link
    /// returns immediately with nothing dispatched.
    pub fn poll_async<F>(&mut self, mut handle: F) -> Result<()>
    where
        F: FnMut(&Header, &[u8]),
    {
        debug_assert_eq!(self.role, Role::Async);
        let Some(datagram) = self.recv_datagram()? else {
            return Ok(());
        };
        for msg in message::RawMessages::new(datagram) {
            let raw = msg?;
            let view = message::checkin(raw)?;
            if view.header.pid != 0 {
                continue;
            }
            handle(&view.header, view.body);
        }
        Ok(())
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

/// Lets a caller register the async endpoint's fd with its own reactor;
/// this crate has no event loop of its own (§5: "the daemon event loop"
/// is an external collaborator).
impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}
