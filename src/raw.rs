//! Low-level socket operations
//!
//! Thin safe wrappers over the libc socket calls the benchmark drives:
//! socket creation and setup on the accept side, and the three send-path
//! primitives on the data side (`send(2)`, scatter-gather `sendmsg(2)`, and
//! `sendmsg(2)` in kernel zero-copy mode).
//!
//! # Platform Support
//!
//! The crate targets Unix. Kernel zero-copy transmission (`SO_ZEROCOPY` +
//! `MSG_ZEROCOPY`) is Linux-only; on other Unixes [`set_zerocopy`] reports
//! the feature as unsupported and callers fall back to the plain
//! scatter-gather path.
//!
//! # Safety
//!
//! This module contains `unsafe` code for raw system calls and socket
//! address conversion. All of it is encapsulated behind safe interfaces;
//! the `unsafe fn`s here require only that the caller owns the file
//! descriptor it passes in.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, RawFd};

/// Platform socket handle.
pub type OsSocket = RawFd;

/// IP protocol domain for sockets
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    /// IPv4 protocol
    Ipv4,
    /// IPv6 protocol
    Ipv6,
}

/// Platform-specific socket address storage
#[derive(Debug)]
pub enum SockAddr {
    /// IPv4 socket address
    V4(libc::sockaddr_in),
    /// IPv6 socket address
    V6(libc::sockaddr_in6),
}

/// Convert SocketAddr to platform-specific socket address
pub fn to_sockaddr(addr: SocketAddr) -> (Domain, SockAddr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(a) => {
            let mut s: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            s.sin_family = libc::AF_INET as _;
            s.sin_port = a.port().to_be();
            s.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(a.ip().octets()).to_be(),
            };
            (
                Domain::Ipv4,
                SockAddr::V4(s),
                std::mem::size_of::<libc::sockaddr_in>() as _,
            )
        }
        SocketAddr::V6(a) => {
            let mut s: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            s.sin6_family = libc::AF_INET6 as _;
            s.sin6_port = a.port().to_be();
            s.sin6_flowinfo = a.flowinfo();
            s.sin6_scope_id = a.scope_id();
            s.sin6_addr = libc::in6_addr {
                s6_addr: a.ip().octets(),
            };
            (
                Domain::Ipv6,
                SockAddr::V6(s),
                std::mem::size_of::<libc::sockaddr_in6>() as _,
            )
        }
    }
}

/// Create a new TCP stream socket in the given domain
pub fn tcp_socket(domain: Domain) -> io::Result<OsSocket> {
    let d = match domain {
        Domain::Ipv4 => libc::AF_INET,
        Domain::Ipv6 => libc::AF_INET6,
    };
    let fd = unsafe { libc::socket(d, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Raw bind operation for socket to address
pub unsafe fn bind_raw(os: OsSocket, sa: &SockAddr, len: libc::socklen_t) -> io::Result<()> {
    let ptr = match sa {
        SockAddr::V4(s) => s as *const _ as *const libc::sockaddr,
        SockAddr::V6(s) => s as *const _ as *const libc::sockaddr,
    };
    if unsafe { libc::bind(os, ptr, len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Start listening on socket with specified backlog
pub fn listen_raw(os: OsSocket, backlog: i32) -> io::Result<()> {
    if unsafe { libc::listen(os, backlog) } != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Set socket non-blocking mode
pub fn set_nonblocking(os: OsSocket, on: bool) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(os, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let nb = if on {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(os, libc::F_SETFL, nb) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Set socket receive buffer size
pub fn set_recv_buffer(os: OsSocket, sz: i32) -> io::Result<()> {
    setsockopt_int(os, libc::SOL_SOCKET, libc::SO_RCVBUF, sz)
}
/// Set socket send buffer size
pub fn set_send_buffer(os: OsSocket, sz: i32) -> io::Result<()> {
    setsockopt_int(os, libc::SOL_SOCKET, libc::SO_SNDBUF, sz)
}
/// Enable address reuse across quick listener restarts
pub fn set_reuse_addr(os: OsSocket, on: bool) -> io::Result<()> {
    setsockopt_int(os, libc::SOL_SOCKET, libc::SO_REUSEADDR, on as i32)
}
/// Disable TCP Nagle algorithm for low latency
pub fn set_tcp_nodelay(os: OsSocket, on: bool) -> io::Result<()> {
    setsockopt_int(os, libc::IPPROTO_TCP, libc::TCP_NODELAY, on as i32)
}
/// Configure IPv6-only mode (disable dual-stack)
pub fn set_ipv6_only(os: OsSocket, only: bool) -> io::Result<()> {
    setsockopt_int(os, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, only as i32)
}

fn setsockopt_int(fd: RawFd, level: i32, opt: i32, val: i32) -> io::Result<()> {
    let v = val as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            &v as *const _ as _,
            std::mem::size_of::<libc::c_int>() as _,
        )
    };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Convert OS socket to std TCP listener
pub unsafe fn tcp_listener_from_os(fd: RawFd) -> std::net::TcpListener {
    unsafe { std::net::TcpListener::from_raw_fd(fd) }
}
/// Convert OS socket to std TCP stream
pub unsafe fn tcp_stream_from_os(fd: RawFd) -> std::net::TcpStream {
    unsafe { std::net::TcpStream::from_raw_fd(fd) }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const NOSIGNAL: libc::c_int = libc::MSG_NOSIGNAL;

        /// Flag submitting a send in kernel zero-copy mode.
        pub const ZEROCOPY_FLAG: libc::c_int = libc::MSG_ZEROCOPY;

        /// Enable kernel zero-copy transmission on the socket.
        ///
        /// Requires Linux 4.14+. Callers treat failure as a capability
        /// probe, not an error: the connection continues with copied sends.
        pub fn set_zerocopy(os: OsSocket) -> io::Result<()> {
            setsockopt_int(os, libc::SOL_SOCKET, libc::SO_ZEROCOPY, 1)
        }
    } else {
        const NOSIGNAL: libc::c_int = 0;

        /// No zero-copy submission mode on this platform.
        pub const ZEROCOPY_FLAG: libc::c_int = 0;

        /// Kernel zero-copy transmission is unavailable off Linux.
        pub fn set_zerocopy(_os: OsSocket) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "SO_ZEROCOPY requires Linux",
            ))
        }
    }
}

/// Build an iovec segment over `buf`.
///
/// The segment borrows `buf` by address and must not outlive it.
pub fn iovec(buf: &[u8]) -> libc::iovec {
    libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    }
}

/// Submit `buf` with `send(2)`.
///
/// Returns the byte count the kernel accepted; `Ok(0)` only for an empty
/// buffer. Interrupts and would-block surface as the corresponding
/// `io::Error` kinds for the caller's retry policy.
pub fn send(os: OsSocket, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::send(os, buf.as_ptr() as *const libc::c_void, buf.len(), NOSIGNAL) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Submit a scatter-gather descriptor with `sendmsg(2)`.
///
/// `flags` is OR-ed into the submission; pass [`ZEROCOPY_FLAG`] for
/// zero-copy mode, `0` otherwise.
pub fn sendmsg(os: OsSocket, iov: &[libc::iovec], flags: libc::c_int) -> io::Result<usize> {
    let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
    hdr.msg_iov = iov.as_ptr() as *mut libc::iovec;
    hdr.msg_iovlen = iov.len() as _;
    let n = unsafe { libc::sendmsg(os, &hdr, flags | NOSIGNAL) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}
