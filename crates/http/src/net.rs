//! Listening socket setup.
//!
//! [`parse_ip`] turns a textual address into a [`SocketAddr`]; [`listen`] creates a
//! non-blocking, close-on-exec listener ready to be handed to a scheduler task.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::{AddrParseError, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("invalid address {text:?}: {source}")]
    Address { text: String, source: AddrParseError },

    #[error("unknown network interface {name:?}")]
    Interface { name: String },

    #[error("socket(2) failed: {0}")]
    Socket(#[source] io::Error),

    #[error("setsockopt(2) failed: {0}")]
    SetOption(#[source] io::Error),

    #[error("bind to {addr} failed: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("listen(2) failed: {0}")]
    Listen(#[source] io::Error),
}

/// Parses an IPv4 or IPv6 address and attaches `port`.
///
/// Text containing `:` is taken as IPv6 and may end in `%zone`, where the zone is
/// an interface name or a numeric scope id.
pub fn parse_ip(text: &str, port: u16) -> Result<SocketAddr, ListenError> {
    if !text.contains(':') {
        let ip: Ipv4Addr = text.parse().map_err(|source| ListenError::Address { text: text.to_string(), source })?;
        return Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }

    let (addr, zone) = match text.rsplit_once('%') {
        Some((addr, zone)) => (addr, Some(zone)),
        None => (text, None),
    };
    let ip: Ipv6Addr = addr.parse().map_err(|source| ListenError::Address { text: text.to_string(), source })?;
    let scope_id = match zone {
        Some(zone) => interface_index(zone)?,
        None => 0,
    };
    Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope_id)))
}

fn interface_index(zone: &str) -> Result<u32, ListenError> {
    if let Ok(index) = zone.parse::<u32>() {
        return Ok(index);
    }

    let unknown = || ListenError::Interface { name: zone.to_string() };
    let name = CString::new(zone).map_err(|_nul| unknown())?;
    // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(unknown());
    }
    Ok(index)
}

/// Creates a listening TCP socket on `addr`.
///
/// The socket is non-blocking and close-on-exec with `SO_REUSEADDR` set; with
/// `reuse_port` several listeners may share the same address.
pub fn listen(addr: SocketAddr, backlog: i32, reuse_port: bool) -> Result<TcpListener, ListenError> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    // SAFETY: socket(2) takes no pointers.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(ListenError::Socket(io::Error::last_os_error()));
    }
    // SAFETY: `fd` was just created and nothing else owns it.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    enable_option(&socket, libc::SO_REUSEADDR).map_err(ListenError::SetOption)?;
    if reuse_port {
        enable_option(&socket, libc::SO_REUSEPORT).map_err(ListenError::SetOption)?;
    }

    bind(&socket, addr).map_err(|source| ListenError::Bind { addr, source })?;

    // SAFETY: listen(2) takes no pointers and the descriptor is open.
    if unsafe { libc::listen(socket.as_raw_fd(), backlog) } < 0 {
        return Err(ListenError::Listen(io::Error::last_os_error()));
    }

    debug!(%addr, backlog, reuse_port, "listening");
    Ok(TcpListener::from(socket))
}

fn enable_option(socket: &OwnedFd, option: libc::c_int) -> io::Result<()> {
    let one: libc::c_int = 1;
    // SAFETY: the option value points to a live c_int and its size is passed along.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&raw const one).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind(socket: &OwnedFd, addr: SocketAddr) -> io::Result<()> {
    let ret = match addr {
        SocketAddr::V4(v4) => {
            let raw = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            // SAFETY: `raw` is a complete sockaddr_in and its size is passed along.
            unsafe {
                libc::bind(
                    socket.as_raw_fd(),
                    (&raw const raw).cast::<libc::sockaddr>(),
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let raw = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: `raw` is a complete sockaddr_in6 and its size is passed along.
            unsafe {
                libc::bind(
                    socket.as_raw_fd(),
                    (&raw const raw).cast::<libc::sockaddr>(),
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
