//! Zero-copy completion notifications and buffer reuse gating
//!
//! A socket in kernel zero-copy mode does not copy submitted pages; it pins
//! them and DMA-reads them after `sendmsg` has returned. The kernel reports
//! when it is done with a submission on the socket's error queue, as a
//! `sock_extended_err` carrying an inclusive range `[low, high]` of completed
//! send-sequence numbers. Until a submission's number is covered by such a
//! range, releasing or rewriting its buffers is undefined behavior at the
//! hardware level.
//!
//! [`CompletionTracker`] reads one notification per poll and reports it as an
//! [`Outcome`]; it does no lifetime bookkeeping of its own. [`SendWindow`]
//! owns that bookkeeping: it counts submissions, folds reported ranges into a
//! monotonic high-water mark, and answers the only question the send loop is
//! allowed to ask directly, "is the buffer set safe to release".
//!
//! The error queue is bounded. Callers must poll periodically during a long
//! send loop, not just at teardown, or notifications are dropped silently
//! once the queue overflows.

use std::io;
use std::os::unix::io::RawFd;

use crate::error;

/// Result of reading one notification from the error queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The queue is empty. Not an error.
    NoneAvailable,
    /// Send-sequence numbers `low..=high` are complete; their buffers may be
    /// reused or released.
    Completed { low: u32, high: u32 },
    /// The notification was malformed or not a zero-copy completion.
    /// Callers log and ignore it.
    ProtocolError,
}

/// Reads zero-copy completion notifications from one connection's error
/// queue.
#[derive(Debug)]
pub struct CompletionTracker {
    fd: RawFd,
    polls: u64,
}

impl CompletionTracker {
    pub fn new(fd: RawFd) -> Self {
        Self { fd, polls: 0 }
    }

    /// Number of poll calls made so far, across send loop and drain.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Reads at most one notification.
    ///
    /// In non-blocking mode an empty queue yields `NoneAvailable` without
    /// blocking. Interrupted reads are retried here; every other I/O failure
    /// is returned to the caller.
    pub fn poll(&mut self, blocking: bool) -> io::Result<Outcome> {
        self.polls += 1;
        self.poll_once(blocking)
    }

    /// Polls until the queue is empty, folding every completed range into
    /// `window`. Returns the number of ranges consumed.
    pub fn drain(&mut self, window: &mut SendWindow) -> io::Result<u64> {
        let mut ranges = 0;
        loop {
            match self.poll(false)? {
                Outcome::NoneAvailable => return Ok(ranges),
                Outcome::Completed { low, high } => {
                    window.complete_range(low, high);
                    ranges += 1;
                }
                Outcome::ProtocolError => {
                    log::warn!("ignoring malformed completion notification while draining");
                }
            }
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn poll_once(&mut self, blocking: bool) -> io::Result<Outcome> {
        // Room for one cmsghdr + sock_extended_err + fallback address data.
        #[repr(align(8))]
        struct ControlBuf([u8; 128]);
        let mut control = ControlBuf([0; 128]);

        let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
        hdr.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
        hdr.msg_controllen = control.0.len() as _;

        let mut flags = libc::MSG_ERRQUEUE;
        if !blocking {
            flags |= libc::MSG_DONTWAIT;
        }

        loop {
            let rc = unsafe { libc::recvmsg(self.fd, &mut hdr, flags) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if error::is_would_block(&err) {
                return Ok(Outcome::NoneAvailable);
            }
            if error::is_transient(&err) {
                continue;
            }
            return Err(err);
        }

        let cmsg = unsafe { libc::CMSG_FIRSTHDR(&hdr) };
        if cmsg.is_null() {
            return Ok(Outcome::ProtocolError);
        }
        let (level, ty) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type) };
        let is_recverr = (level == libc::SOL_IP && ty == libc::IP_RECVERR)
            || (level == libc::SOL_IPV6 && ty == libc::IPV6_RECVERR);
        if !is_recverr {
            return Ok(Outcome::ProtocolError);
        }

        let serr = unsafe { &*(libc::CMSG_DATA(cmsg) as *const SockExtendedErr) };
        if serr.ee_errno != 0 || serr.ee_origin != SO_EE_ORIGIN_ZEROCOPY {
            return Ok(Outcome::ProtocolError);
        }

        Ok(Outcome::Completed {
            low: serr.ee_info,
            high: serr.ee_data,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn poll_once(&mut self, _blocking: bool) -> io::Result<Outcome> {
        // No error-queue protocol off Linux; degraded senders never submit
        // in zero-copy mode, so there is never anything to reap.
        Ok(Outcome::NoneAvailable)
    }
}

// struct sock_extended_err from linux/errqueue.h
#[cfg(any(target_os = "linux", target_os = "android"))]
#[repr(C)]
#[derive(Copy, Clone)]
struct SockExtendedErr {
    ee_errno: u32,
    ee_origin: u8,
    ee_type: u8,
    ee_code: u8,
    ee_pad: u8,
    ee_info: u32,
    ee_data: u32,
}

// SO_EE_ORIGIN_ZEROCOPY from linux/errqueue.h
#[cfg(any(target_os = "linux", target_os = "android"))]
const SO_EE_ORIGIN_ZEROCOPY: u8 = 5;

/// Lifetime state of the buffer set backing zero-copy submissions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Handed to the kernel and not yet acknowledged at all.
    Submitted,
    /// Some submissions acknowledged, at least one still pinned.
    PendingCompletion,
    /// Every submission acknowledged; safe to reuse or release.
    Released,
}

/// Tracks which zero-copy submissions the kernel has finished consuming.
///
/// Sequence numbers count up from zero, one per successful submission,
/// matching the numbering the kernel uses in its notifications. The state
/// is advanced only by [`SendWindow::complete_range`] with tracker-reported
/// ranges; the send loop itself never transitions it.
#[derive(Debug)]
pub struct SendWindow {
    next_seq: u32,
    acked: Option<u32>,
    state: BufferState,
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SendWindow {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            acked: None,
            state: BufferState::Released,
        }
    }

    /// Records one successful submission; returns its sequence number.
    pub fn record_submit(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.state = if self.acked.is_some() {
            BufferState::PendingCompletion
        } else {
            BufferState::Submitted
        };
        seq
    }

    /// Folds a tracker-reported completed range into the window.
    ///
    /// The high-water mark is monotonic: ranges may arrive out of strict
    /// submission order, but a stale or duplicate range never moves it
    /// backwards. Returns the number of newly acknowledged submissions.
    pub fn complete_range(&mut self, _low: u32, high: u32) -> u32 {
        let newly = match self.acked {
            None => high.wrapping_add(1),
            Some(prev) => {
                let delta = high.wrapping_sub(prev);
                // Half the sequence space away means a reordered stale range
                if delta == 0 || delta > u32::MAX / 2 {
                    0
                } else {
                    delta
                }
            }
        };
        if newly > 0 {
            self.acked = Some(high);
            self.state = if self.outstanding() == 0 {
                BufferState::Released
            } else {
                BufferState::PendingCompletion
            };
        }
        newly
    }

    /// Submissions the kernel has not yet acknowledged.
    pub fn outstanding(&self) -> u32 {
        match self.acked {
            None => self.next_seq,
            Some(high) => self.next_seq.wrapping_sub(high.wrapping_add(1)),
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// True when no submission is still pinned by the kernel.
    pub fn release_safe(&self) -> bool {
        self.outstanding() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_starts_released() {
        let w = SendWindow::new();
        assert_eq!(w.state(), BufferState::Released);
        assert_eq!(w.outstanding(), 0);
        assert!(w.release_safe());
    }

    #[test]
    fn submit_then_complete_lifecycle() {
        let mut w = SendWindow::new();
        for _ in 0..3 {
            w.record_submit();
        }
        assert_eq!(w.state(), BufferState::Submitted);
        assert_eq!(w.outstanding(), 3);
        assert!(!w.release_safe());

        assert_eq!(w.complete_range(0, 1), 2);
        assert_eq!(w.state(), BufferState::PendingCompletion);
        assert_eq!(w.outstanding(), 1);

        assert_eq!(w.complete_range(2, 2), 1);
        assert_eq!(w.state(), BufferState::Released);
        assert!(w.release_safe());

        // A later submission pins the set again
        w.record_submit();
        assert_eq!(w.state(), BufferState::PendingCompletion);
        assert!(!w.release_safe());
    }

    #[test]
    fn high_water_mark_is_monotonic() {
        let mut w = SendWindow::new();
        for _ in 0..10 {
            w.record_submit();
        }
        assert_eq!(w.complete_range(0, 5), 6);
        // Stale and duplicate ranges do not move the mark backwards
        assert_eq!(w.complete_range(0, 3), 0);
        assert_eq!(w.complete_range(4, 5), 0);
        assert_eq!(w.outstanding(), 4);
        assert_eq!(w.complete_range(6, 9), 4);
        assert!(w.release_safe());
    }

    #[test]
    fn sequence_numbers_assigned_in_order() {
        let mut w = SendWindow::new();
        assert_eq!(w.record_submit(), 0);
        assert_eq!(w.record_submit(), 1);
        assert_eq!(w.record_submit(), 2);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    mod errqueue {
        use super::super::*;
        use std::os::unix::io::AsRawFd;

        fn stream_pair() -> (std::net::TcpStream, std::net::TcpStream) {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let a = std::net::TcpStream::connect(addr).unwrap();
            let (b, _) = listener.accept().unwrap();
            (a, b)
        }

        #[test]
        fn empty_queue_polls_none_without_blocking() {
            let (a, _b) = stream_pair();
            let mut tracker = CompletionTracker::new(a.as_raw_fd());
            assert_eq!(tracker.poll(false).unwrap(), Outcome::NoneAvailable);
            assert_eq!(tracker.polls(), 1);
        }

        #[test]
        fn drain_on_empty_queue_consumes_nothing() {
            let (a, _b) = stream_pair();
            let mut tracker = CompletionTracker::new(a.as_raw_fd());
            let mut window = SendWindow::new();
            assert_eq!(tracker.drain(&mut window).unwrap(), 0);
            assert!(window.release_safe());
        }
    }
}
