//! Crate-wide error type.
//!
//! Per the error taxonomy, fatal conditions (socket I/O, truncated
//! datagrams, buffer overflow while building a request) are the only
//! ones represented here. Decode-level rejections (malformed attribute,
//! unresolvable interface, ...) are logged and reported to callers as
//! `None`/skip rather than `Err` -- see the module docs on `link`,
//! `addr` and `route::decode`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create rtnetlink socket: {0}")]
    CreateSocket(nix::Error),

    #[error("failed to bind rtnetlink socket: {0}")]
    BindSocket(nix::Error),

    #[error("failed to join multicast groups: {0}")]
    JoinGroups(nix::Error),

    #[error("rtnetlink sendto failed: {0}")]
    Send(nix::Error),

    #[error("rtnetlink recvmsg failed: {0}")]
    Recv(nix::Error),

    #[error("received truncated rtnetlink datagram")]
    Truncated,

    #[error("request buffer overflow while building message")]
    BufferOverflow,

    #[error("kernel table ({0}, {1}) already registered")]
    TableTaken(u8, u32),

    #[error("failed to build config: {0}")]
    Build(#[from] derive_builder::UninitializedFieldError),
}
