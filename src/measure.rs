//! Receive-side measurement harness
//!
//! Runs a fixed-duration receive loop against the flat wire format: stamp,
//! block on a read of up to one message, stamp again, accumulate. The wire
//! carries no framing, so the harness resynchronizes purely by byte count
//! and treats each read as one message sample, matching what the send side
//! submits per call.

use std::io::Read;
use std::time::{Duration, Instant};

use crate::error::{self, Error, Result};

/// Running totals for one timed receive window.
#[derive(Debug)]
pub struct Accumulator {
    bytes: u64,
    messages: u64,
    latency: Duration,
    start: Instant,
    deadline: Instant,
}

impl Accumulator {
    /// Opens a measurement window of the given length starting now.
    pub fn start(window: Duration) -> Self {
        let start = Instant::now();
        Self {
            bytes: 0,
            messages: 0,
            latency: Duration::ZERO,
            start,
            deadline: start + window,
        }
    }

    /// Records one receive call's byte count and blocking time.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) {
        self.bytes += bytes as u64;
        self.messages += 1;
        self.latency += elapsed;
    }

    /// True once the window has closed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Closes the window and computes the final report.
    pub fn finish(self) -> Result<Report> {
        Report::compute(self.bytes, self.messages, self.start.elapsed(), self.latency)
    }
}

/// Final throughput and latency figures for one measurement window.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Report {
    pub bytes: u64,
    pub messages: u64,
    pub elapsed: Duration,
    /// Gigabits per second over the whole window.
    pub throughput_gbps: f64,
    /// Mean blocking time per receive call, in microseconds.
    pub avg_latency_us: f64,
}

impl Report {
    /// Computes the derived figures, refusing to divide by a zero message
    /// count: an empty window is reported as [`Error::NoTraffic`], never as
    /// NaN throughput.
    fn compute(bytes: u64, messages: u64, elapsed: Duration, latency: Duration) -> Result<Report> {
        if messages == 0 {
            return Err(Error::NoTraffic);
        }
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Err(Error::NoTraffic);
        }
        Ok(Report {
            bytes,
            messages,
            elapsed,
            throughput_gbps: bytes as f64 * 8.0 / secs / 1e9,
            avg_latency_us: latency.as_secs_f64() * 1e6 / messages as f64,
        })
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RESULTS: bytes={} messages={} duration_ms={:.2} throughput_gbps={:.6} latency_us={:.2}",
            self.bytes,
            self.messages,
            self.elapsed.as_secs_f64() * 1e3,
            self.throughput_gbps,
            self.avg_latency_us
        )
    }
}

/// Receives messages from `reader` for `window` and reports throughput and
/// average per-receive latency.
///
/// `message_len` sizes the receive buffer to one full wire-format message.
/// Interrupted reads are retried; a zero-length read or a disconnect ends
/// the loop early and whatever was accumulated is reported.
pub fn run<R: Read>(reader: &mut R, message_len: usize, window: Duration) -> Result<Report> {
    if message_len == 0 {
        return Err(Error::Config("message length must be > 0".into()));
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(message_len)?;
    buf.resize(message_len, 0);

    let mut acc = Accumulator::start(window);
    while !acc.expired() {
        let begin = Instant::now();
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => acc.record(n, begin.elapsed()),
            Err(e) if error::is_transient(&e) => continue,
            Err(e) if error::is_disconnect(&e) => break,
            Err(e) => return Err(e.into()),
        }
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn zero_messages_is_an_error_not_nan() {
        let err = Report::compute(0, 0, Duration::from_secs(1), Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::NoTraffic));
    }

    #[test]
    fn report_math_on_known_inputs() {
        // 125 MB over one second is exactly one gigabit per second
        let report = Report::compute(
            125_000_000,
            2,
            Duration::from_secs(1),
            Duration::from_millis(1),
        )
        .unwrap();
        assert!((report.throughput_gbps - 1.0).abs() < 1e-9);
        assert!((report.avg_latency_us - 500.0).abs() < 1e-6);
    }

    #[test]
    fn elapsed_window_yields_no_traffic() {
        // An already-expired deadline must not produce garbage figures
        let mut endless = io::repeat(0xAB);
        let err = run(&mut endless, 512, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::NoTraffic));
    }

    #[test]
    fn short_stream_stops_at_eof() {
        let data = vec![7u8; 1024];
        let mut cursor = io::Cursor::new(data);
        let report = run(&mut cursor, 512, Duration::from_secs(5)).unwrap();
        assert_eq!(report.bytes, 1024);
        assert_eq!(report.messages, 2);
        assert!(report.throughput_gbps > 0.0);
    }

    #[test]
    fn zero_message_len_rejected() {
        let mut endless = io::repeat(0);
        assert!(matches!(
            run(&mut endless, 0, Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn display_formats_result_line() {
        let report = Report::compute(512, 1, Duration::from_secs(1), Duration::from_micros(250))
            .unwrap();
        let line = report.to_string();
        assert!(line.starts_with("RESULTS: bytes=512 messages=1"));
        assert!(line.contains("latency_us=250.00"));
    }
}
