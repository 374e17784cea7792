//! Socket tuning and benchmark parameters
//!
//! Two configuration surfaces live here. [`NetConfig`] tunes the sockets
//! themselves (buffer sizes, Nagle, backlog) and is applied to the raw fd
//! before it is converted to a standard library type. [`BenchConfig`] carries
//! the benchmark parameters handed in by the process bootstrap; the core
//! validates them but never parses them.
//!
//! # Examples
//!
//! ```rust
//! use sendpath::NetConfig;
//!
//! // Big socket buffers for a sustained-throughput run
//! let cfg = NetConfig {
//!     send_buf: Some(16 << 20),
//!     recv_buf: Some(16 << 20),
//!     ..Default::default()
//! };
//! # let _ = cfg;
//! ```

use std::io;

use crate::error::{Error, Result};
use crate::message::FIELD_COUNT;
use crate::raw;

/// Socket configuration applied at bind/connect time.
///
/// All parameters are optional or defaulted; the defaults favor sustained
/// throughput, which is what a copy-strategy comparison wants to measure
/// rather than be limited by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetConfig {
    /// Enable TCP_NODELAY so sends hit the wire without Nagle batching.
    ///
    /// **Default**: `true`
    pub tcp_nodelay: bool,

    /// Enable SO_REUSEADDR on listeners.
    ///
    /// **Default**: `true`
    pub reuse_addr: bool,

    /// Socket receive buffer size in bytes.
    ///
    /// **Default**: `Some(4MB)`
    pub recv_buf: Option<usize>,

    /// Socket send buffer size in bytes.
    ///
    /// **Default**: `Some(4MB)`
    pub send_buf: Option<usize>,

    /// IPv6-only socket configuration.
    ///
    /// - `Some(true)`: IPv6 only, reject IPv4
    /// - `Some(false)`: dual-stack
    /// - `None`: system default
    ///
    /// **Default**: `Some(false)`
    pub ipv6_only: Option<bool>,

    /// TCP listen backlog size.
    ///
    /// **Default**: `Some(1024)`
    pub tcp_backlog: Option<i32>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            reuse_addr: true,
            recv_buf: Some(4 << 20),
            send_buf: Some(4 << 20),
            ipv6_only: Some(false),
            tcp_backlog: Some(1024),
        }
    }
}

impl NetConfig {
    /// Configuration for maximum sustained transfer rates: 16MB socket
    /// buffers, Nagle left on so the kernel may coalesce, a large accept
    /// backlog for connection bursts.
    pub fn high_throughput() -> Self {
        Self {
            tcp_nodelay: false,
            reuse_addr: true,
            recv_buf: Some(16 << 20),
            send_buf: Some(16 << 20),
            ipv6_only: Some(false),
            tcp_backlog: Some(2048),
        }
    }
}

/// Applies socket tuning to a raw socket.
///
/// Must be called before the fd is converted to a standard library type.
/// Unsupported options fail the call rather than being silently skipped;
/// the only capability treated as best-effort in this crate is zero-copy
/// mode, which is probed separately at send-loop setup.
pub fn apply_socket_tuning(os: raw::OsSocket, domain: raw::Domain, cfg: &NetConfig) -> io::Result<()> {
    if let Some(sz) = cfg.recv_buf {
        raw::set_recv_buffer(os, sz as i32)?;
    }
    if let Some(sz) = cfg.send_buf {
        raw::set_send_buffer(os, sz as i32)?;
    }
    if cfg.reuse_addr {
        raw::set_reuse_addr(os, true)?;
    }
    if let raw::Domain::Ipv6 = domain {
        if let Some(only) = cfg.ipv6_only {
            raw::set_ipv6_only(os, only)?;
        }
    }
    if cfg.tcp_nodelay {
        raw::set_tcp_nodelay(os, true)?;
    }
    Ok(())
}

/// Benchmark parameters consumed from the process bootstrap.
///
/// `field_size` shapes every message; `max_connections` caps concurrently
/// served connections at accept time; `pin_workers` spreads worker threads
/// across CPU cores round-robin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchConfig {
    /// Bytes per message field (> 0).
    pub field_size: usize,
    /// Admission cap on concurrently active connections (> 0).
    pub max_connections: usize,
    /// Pin each worker thread to a CPU core.
    pub pin_workers: bool,
}

impl BenchConfig {
    pub fn new(field_size: usize, max_connections: usize) -> Self {
        Self {
            field_size,
            max_connections,
            pin_workers: false,
        }
    }

    /// Total bytes of one wire-format message under this configuration.
    pub fn message_len(&self) -> usize {
        FIELD_COUNT * self.field_size
    }

    /// Rejects parameters the benchmark cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.field_size == 0 {
            return Err(Error::Config("field_size must be > 0".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.recv_buf, Some(4 << 20));
        assert_eq!(config.send_buf, Some(4 << 20));
        assert_eq!(config.ipv6_only, Some(false));
    }

    #[test]
    fn test_high_throughput_config() {
        let config = NetConfig::high_throughput();
        assert_eq!(config.recv_buf, Some(16 << 20));
        assert!(!config.tcp_nodelay);
        assert_eq!(config.tcp_backlog, Some(2048));
    }

    #[test]
    fn bench_config_message_len() {
        let cfg = BenchConfig::new(64, 4);
        assert_eq!(cfg.message_len(), 512);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bench_config_rejects_zeroes() {
        assert!(BenchConfig::new(0, 4).validate().is_err());
        assert!(BenchConfig::new(64, 0).validate().is_err());
    }
}
