//! The three transmission pipelines
//!
//! Each strategy sends the same wire image in a tight loop for the lifetime
//! of a connection; they differ only in buffer layout and in how many times
//! the payload is copied between user space and the device:
//!
//! - **Full-copy** ([`FullCopySender`]): serialize once into a scratch
//!   buffer, then repeated `send(2)`. The kernel stages the payload in its
//!   own socket buffer on every call.
//! - **Single-buffer** ([`SingleBufferSender`]): serialize once into one
//!   page-aligned buffer and submit it as a single-segment `sendmsg(2)`.
//!   The aligned, reused buffer lets the kernel skip one re-staging step.
//! - **Kernel zero-copy** ([`ZeroCopySender`]): submit the eight field
//!   buffers directly as an 8-segment descriptor with `MSG_ZEROCOPY`. The
//!   device pulls from user memory, and the buffers stay on loan to the
//!   kernel until the completion tracker reports them consumed.
//!
//! The variant is selected at connection setup, not compile time: the
//! zero-copy pipeline probes `SO_ZEROCOPY` once and, where the kernel
//! declines, keeps running the same loop in a degraded copied mode so that a
//! missing capability never kills a connection.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::str::FromStr;
use std::time::Duration;

use crate::buf::AlignedBuf;
use crate::completion::{CompletionTracker, Outcome, SendWindow};
use crate::error::{self, Error, Result};
use crate::message::Message;
use crate::raw;
use crate::tcp::TcpStream;

/// Every this many successful zero-copy submissions, reap completions even
/// if the socket never pushed back. Bounds the error-queue backlog so the
/// kernel never drops a notification.
pub const COMPLETION_POLL_INTERVAL: u64 = 1000;

/// Whether a proactive completion poll is due after `submitted` sends.
pub fn completion_poll_due(submitted: u64) -> bool {
    submitted > 0 && submitted % COMPLETION_POLL_INTERVAL == 0
}

/// Send pipeline selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Blocking `send(2)` of a serialized scratch buffer.
    FullCopy,
    /// Single-segment `sendmsg(2)` of one page-aligned buffer.
    SingleBuffer,
    /// Multi-segment `sendmsg(2)` with `MSG_ZEROCOPY`.
    ZeroCopy,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full-copy" => Ok(Self::FullCopy),
            "single-buffer" => Ok(Self::SingleBuffer),
            "zero-copy" => Ok(Self::ZeroCopy),
            other => Err(Error::Config(format!(
                "unknown strategy `{other}` (expected full-copy, single-buffer or zero-copy)"
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FullCopy => "full-copy",
            Self::SingleBuffer => "single-buffer",
            Self::ZeroCopy => "zero-copy",
        })
    }
}

/// Counters a sender accumulates over the lifetime of its connection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Successful submissions.
    pub messages: u64,
    /// Completion-tracker polls, periodic and on push-back combined.
    pub completion_polls: u64,
    /// Completed ranges consumed from the error queue.
    pub completed_ranges: u64,
    /// The zero-copy pipeline ran without kernel zero-copy mode.
    pub degraded: bool,
}

/// A transmission pipeline bound to one connection and one message.
///
/// Borrows the message for its whole lifetime: the zero-copy variant hands
/// the field buffers to the kernel by address, so the message must not move
/// or drop while a sender built over it exists.
pub enum Sender<'m> {
    FullCopy(FullCopySender),
    SingleBuffer(SingleBufferSender),
    ZeroCopy(ZeroCopySender<'m>),
}

impl<'m> Sender<'m> {
    /// Builds the pipeline for `strategy`, resolving capabilities and
    /// allocating connection-local buffers up front.
    pub fn new(strategy: Strategy, message: &'m Message, stream: &TcpStream) -> Result<Self> {
        let fd = stream.as_raw_fd();
        match strategy {
            Strategy::FullCopy => Ok(Self::FullCopy(FullCopySender::new(message, fd)?)),
            Strategy::SingleBuffer => Ok(Self::SingleBuffer(SingleBufferSender::new(message, fd)?)),
            Strategy::ZeroCopy => Ok(Self::ZeroCopy(ZeroCopySender::new(message, fd)?)),
        }
    }

    /// Runs the send loop until the peer disconnects or the socket fails.
    ///
    /// A disconnect ends the loop normally; only unexpected socket errors
    /// surface as `Err`. Interrupted calls are retried in place.
    pub fn run(&mut self) -> Result<()> {
        match self {
            Self::FullCopy(s) => s.run(),
            Self::SingleBuffer(s) => s.run(),
            Self::ZeroCopy(s) => s.run(),
        }
    }

    /// Consumes whatever completion notifications remain.
    ///
    /// Required before the message buffers may be released for the
    /// zero-copy variant; a no-op for the copied pipelines.
    pub fn drain(&mut self) {
        if let Self::ZeroCopy(s) = self {
            s.drain();
        }
    }

    pub fn stats(&self) -> SendStats {
        match self {
            Self::FullCopy(s) => s.stats,
            Self::SingleBuffer(s) => s.stats,
            Self::ZeroCopy(s) => s.stats,
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::FullCopy(_) => Strategy::FullCopy,
            Self::SingleBuffer(_) => Strategy::SingleBuffer,
            Self::ZeroCopy(_) => Strategy::ZeroCopy,
        }
    }
}

/// Baseline pipeline: repeated blocking `send(2)` of a scratch serialization.
pub struct FullCopySender {
    fd: RawFd,
    wire: Vec<u8>,
    stats: SendStats,
}

impl FullCopySender {
    fn new(message: &Message, fd: RawFd) -> Result<Self> {
        Ok(Self {
            fd,
            wire: message.to_wire()?,
            stats: SendStats::default(),
        })
    }

    fn run(&mut self) -> Result<()> {
        loop {
            match raw::send(self.fd, &self.wire) {
                Ok(0) => return Ok(()),
                Ok(_) => self.stats.messages += 1,
                Err(e) if error::is_transient(&e) => continue,
                Err(e) if error::is_disconnect(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// One-copy pipeline: a page-aligned buffer serialized once per connection
/// and submitted as a single scatter-gather segment until teardown.
pub struct SingleBufferSender {
    fd: RawFd,
    buf: AlignedBuf,
    stats: SendStats,
}

impl SingleBufferSender {
    fn new(message: &Message, fd: RawFd) -> Result<Self> {
        let mut buf = AlignedBuf::zeroed(message.wire_len())?;
        message.serialize_into(&mut buf);
        Ok(Self {
            fd,
            buf,
            stats: SendStats::default(),
        })
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let iov = [raw::iovec(&self.buf)];
            match raw::sendmsg(self.fd, &iov, 0) {
                Ok(0) => return Ok(()),
                Ok(_) => self.stats.messages += 1,
                Err(e) if error::is_transient(&e) => continue,
                Err(e) if error::is_disconnect(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Zero-copy pipeline: the message's eight field buffers submitted as one
/// 8-segment descriptor in kernel zero-copy mode, with completion reaping.
pub struct ZeroCopySender<'m> {
    fd: RawFd,
    message: &'m Message,
    window: SendWindow,
    tracker: CompletionTracker,
    zerocopy: bool,
    stats: SendStats,
}

impl<'m> ZeroCopySender<'m> {
    fn new(message: &'m Message, fd: RawFd) -> Result<Self> {
        let zerocopy = match raw::set_zerocopy(fd) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "{}; continuing with copied sends ({err})",
                    Error::Unsupported("kernel zero-copy")
                );
                false
            }
        };
        // Error-queue polling must never stall the send loop
        raw::set_nonblocking(fd, true)?;
        Ok(Self {
            fd,
            message,
            window: SendWindow::new(),
            tracker: CompletionTracker::new(fd),
            zerocopy,
            stats: SendStats {
                degraded: !zerocopy,
                ..SendStats::default()
            },
        })
    }

    fn run(&mut self) -> Result<()> {
        let iov: Vec<libc::iovec> = self.message.fields().map(raw::iovec).collect();
        let flags = if self.zerocopy { raw::ZEROCOPY_FLAG } else { 0 };
        loop {
            match raw::sendmsg(self.fd, &iov, flags) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    self.window.record_submit();
                    self.stats.messages += 1;
                    if self.zerocopy && completion_poll_due(self.stats.messages) {
                        self.reap();
                    }
                }
                // Push-back frees up the pinned-page table before retrying
                Err(e) if error::is_would_block(&e) || error::is_transient(&e) => {
                    self.reap();
                }
                Err(e) if error::is_disconnect(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn reap(&mut self) {
        self.stats.completion_polls += 1;
        match self.tracker.poll(false) {
            Ok(Outcome::NoneAvailable) => {}
            Ok(Outcome::Completed { low, high }) => {
                self.window.complete_range(low, high);
                self.stats.completed_ranges += 1;
            }
            Ok(Outcome::ProtocolError) => {
                log::warn!("ignoring malformed completion notification");
            }
            Err(err) => log::warn!("completion poll failed: {err}"),
        }
    }

    /// Polls the error queue until it is dry and every submission has been
    /// acknowledged, within a bounded grace period for stragglers the kernel
    /// has not delivered yet. The field buffers must not be released before
    /// this returns.
    fn drain(&mut self) {
        if !self.zerocopy {
            return;
        }
        const IDLE_ROUND_LIMIT: u32 = 50;
        let mut idle_rounds = 0;
        loop {
            self.stats.completion_polls += 1;
            match self.tracker.poll(false) {
                Ok(Outcome::Completed { low, high }) => {
                    self.window.complete_range(low, high);
                    self.stats.completed_ranges += 1;
                    idle_rounds = 0;
                }
                Ok(Outcome::ProtocolError) => {
                    log::warn!("ignoring malformed completion notification while draining");
                }
                Ok(Outcome::NoneAvailable) => {
                    if self.window.release_safe() {
                        break;
                    }
                    idle_rounds += 1;
                    if idle_rounds > IDLE_ROUND_LIMIT {
                        log::warn!(
                            "{} submissions unacknowledged at teardown",
                            self.window.outstanding()
                        );
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => {
                    if !self.window.release_safe() {
                        log::warn!(
                            "completion drain stopped by {err} with {} submissions unacknowledged",
                            self.window.outstanding()
                        );
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;

    fn stream_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = std::net::TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        (TcpStream::from_std(a, &NetConfig::default()).unwrap(), b)
    }

    #[test]
    fn strategy_parsing_round_trips() {
        for s in [Strategy::FullCopy, Strategy::SingleBuffer, Strategy::ZeroCopy] {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
        assert!("copy-harder".parse::<Strategy>().is_err());
    }

    #[test]
    fn copied_pipelines_produce_identical_wire_output() {
        let message = Message::new(64).unwrap();
        let (stream, _peer) = stream_pair();
        let fd = stream.as_raw_fd();

        let full = FullCopySender::new(&message, fd).unwrap();
        let single = SingleBufferSender::new(&message, fd).unwrap();
        assert_eq!(full.wire.as_slice(), &single.buf[..]);
        assert_eq!(full.wire.len(), 512);
    }

    #[test]
    fn periodic_poll_cadence_over_2500_sends() {
        let due = (1..=2500u64).filter(|&n| completion_poll_due(n)).count();
        assert_eq!(due, 2);
        assert!(completion_poll_due(1000));
        assert!(completion_poll_due(2000));
        assert!(!completion_poll_due(0));
        assert!(!completion_poll_due(999));
    }

    #[test]
    fn zero_copy_sender_resolves_capability_at_setup() {
        let message = Message::new(32).unwrap();
        let (stream, _peer) = stream_pair();
        let sender = ZeroCopySender::new(&message, stream.as_raw_fd()).unwrap();
        // Capability probe and degraded flag must agree
        assert_eq!(sender.stats.degraded, !sender.zerocopy);
        assert!(sender.window.release_safe());
    }

    #[test]
    fn sender_reports_selected_strategy() {
        let message = Message::new(32).unwrap();
        let (stream, _peer) = stream_pair();
        let sender = Sender::new(Strategy::SingleBuffer, &message, &stream).unwrap();
        assert_eq!(sender.strategy(), Strategy::SingleBuffer);
        assert_eq!(sender.stats(), SendStats::default());
    }
}
