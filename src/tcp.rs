//! TCP endpoints with benchmark socket tuning applied
//!
//! Wrappers around the standard library's TCP types that route socket
//! creation through [`crate::raw`] so [`NetConfig`](crate::NetConfig) tuning
//! lands on the fd before it is wrapped. The listener accepts in blocking
//! mode: the acceptor is the only place this crate ever blocks outside a
//! worker, and each accepted stream is owned by exactly one worker
//! afterwards.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sendpath::{NetConfig, tcp::TcpListener};
//!
//! let config = NetConfig::default();
//! let listener = TcpListener::bind("0.0.0.0:9090".parse().unwrap(), &config)?;
//! loop {
//!     let (stream, addr) = listener.accept()?;
//!     println!("connection from {addr}");
//!     # let _ = stream; break;
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::config::{apply_socket_tuning, NetConfig};
use crate::raw as r;

/// TCP listener with tuning from a [`NetConfig`] applied at bind time.
#[derive(Debug)]
pub struct TcpListener {
    inner: StdTcpListener,
    cfg: NetConfig,
}

/// TCP stream with tuning applied; the unit every strategy sends on.
#[derive(Debug)]
pub struct TcpStream {
    inner: StdTcpStream,
}

impl TcpListener {
    /// Binds a listener to `addr` with all tuning from `cfg` applied.
    ///
    /// The socket is built through the raw layer so buffer sizes, address
    /// reuse and IPv6 mode are set before `bind`; the backlog comes from
    /// `cfg.tcp_backlog`.
    pub fn bind(addr: SocketAddr, cfg: &NetConfig) -> io::Result<Self> {
        let (domain, sa, len) = r::to_sockaddr(addr);
        let os = r::tcp_socket(domain)?;
        apply_socket_tuning(os, domain, cfg)?;
        unsafe {
            r::bind_raw(os, &sa, len)?;
        }
        let backlog = cfg.tcp_backlog.unwrap_or(1024);
        r::listen_raw(os, backlog)?;
        let inner = unsafe { r::tcp_listener_from_os(os) };
        Ok(Self {
            inner,
            cfg: cfg.clone(),
        })
    }

    /// Blocks until a connection arrives and returns it configured.
    ///
    /// The accepted stream inherits the listener's Nagle setting; everything
    /// else was already applied to the listening socket.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (s, a) = self.inner.accept()?;
        s.set_nodelay(self.cfg.tcp_nodelay)?;
        Ok((TcpStream { inner: s }, a))
    }

    /// Gets a reference to the underlying standard library TCP listener
    pub fn as_std(&self) -> &StdTcpListener {
        &self.inner
    }
}

impl TcpStream {
    /// Connects to `addr` and applies tuning from `cfg`.
    pub fn connect(addr: SocketAddr, cfg: &NetConfig) -> io::Result<Self> {
        let s = StdTcpStream::connect(addr)?;
        Self::from_std(s, cfg)
    }

    /// Wraps an existing stream, applying Nagle and buffer tuning from `cfg`.
    pub fn from_std(s: StdTcpStream, cfg: &NetConfig) -> io::Result<Self> {
        s.set_nodelay(cfg.tcp_nodelay)?;
        if let Some(sz) = cfg.recv_buf {
            r::set_recv_buffer(s.as_raw_fd(), sz as i32)?;
        }
        if let Some(sz) = cfg.send_buf {
            r::set_send_buffer(s.as_raw_fd(), sz as i32)?;
        }
        Ok(Self { inner: s })
    }

    /// Gets a reference to the underlying standard library TCP stream
    pub fn as_std(&self) -> &StdTcpStream {
        &self.inner
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
