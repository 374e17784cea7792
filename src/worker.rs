//! Per-connection workers and admission control
//!
//! One worker thread per accepted connection, each owning its message, its
//! transmission buffers and its stream exclusively. Nothing is shared across
//! workers except the admission gate's counter, so the workers need no
//! locks; errors stay inside the connection that raised them.
//!
//! Admission is checked once, at accept time. The gate counts *active*
//! connections: a permit is taken before the worker spawns and returned when
//! the worker exits, so a slot freed by a finished connection can be handed
//! to a new one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::affinity;
use crate::config::BenchConfig;
use crate::error::Result;
use crate::message::Message;
use crate::strategy::{SendStats, Sender, Strategy};
use crate::tcp::{TcpListener, TcpStream};

/// Lifecycle of one connection worker.
///
/// `Draining` only does work for the zero-copy pipeline; every path reaches
/// `Closed` with the same ordering guarantee: buffers are released after the
/// stream is closed, and for zero-copy after the completion queue has been
/// drained.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    Sending,
    Draining,
    Closed,
}

/// Caps the number of concurrently active connections.
///
/// The count is incremented by a successful [`AdmissionGate::try_acquire`]
/// and decremented when the returned [`Permit`] drops with its worker, so
/// the cap bounds live connections, not the lifetime total.
#[derive(Debug)]
pub struct AdmissionGate {
    active: AtomicUsize,
    cap: usize,
}

impl AdmissionGate {
    pub fn new(cap: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            cap,
        }
    }

    /// Claims a connection slot, or `None` when the cap is reached.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.cap {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Permit {
                        gate: Arc::clone(self),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Connections currently holding a permit.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// A claimed connection slot; returns itself to the gate on drop.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<AdmissionGate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Drives one connection from setup to teardown.
pub struct ConnectionHandler {
    stream: TcpStream,
    strategy: Strategy,
    phase: Phase,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, strategy: Strategy) -> Self {
        Self {
            stream,
            strategy,
            phase: Phase::Created,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Allocates the message, runs the selected pipeline until the peer
    /// disconnects or the socket fails, drains completions, then releases
    /// everything: drain, then close, then buffers, in that order.
    pub fn run(mut self, field_size: usize) -> Result<SendStats> {
        let message = Message::new(field_size)?;
        let mut sender = Sender::new(self.strategy, &message, &self.stream)?;

        self.phase = Phase::Sending;
        log::debug!("sending with {} pipeline", sender.strategy());
        let outcome = sender.run();

        self.phase = Phase::Draining;
        sender.drain();

        let stats = sender.stats();
        drop(sender);
        self.phase = Phase::Closed;
        drop(self.stream);
        log::debug!("closed after {} messages", stats.messages);

        outcome?;
        Ok(stats)
    }
}

/// Accept loop: admission-check each connection, then hand it to a worker
/// thread running a [`ConnectionHandler`].
///
/// Rejected connections are closed without spawning anything. Worker errors
/// are logged and contained; they never reach the acceptor or other workers.
pub fn serve(listener: TcpListener, strategy: Strategy, cfg: &BenchConfig) -> Result<()> {
    cfg.validate()?;
    let gate = Arc::new(AdmissionGate::new(cfg.max_connections));
    let cpus = affinity::cpu_count();
    let mut worker_index = 0usize;

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(err) => {
                log::warn!("accept failed: {err}");
                continue;
            }
        };

        let Some(permit) = gate.try_acquire() else {
            log::warn!(
                "admission cap {} reached, rejecting {peer}",
                gate.cap()
            );
            continue;
        };

        let field_size = cfg.field_size;
        let pin = cfg.pin_workers.then_some(worker_index % cpus);
        let name = format!("sendpath-worker-{worker_index}");
        worker_index += 1;

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let _permit = permit;
            if let Some(cpu) = pin {
                if let Err(err) = affinity::pin_to_cpu(cpu) {
                    log::debug!("could not pin worker to cpu {cpu}: {err}");
                }
            }
            match ConnectionHandler::new(stream, strategy).run(field_size) {
                Ok(stats) => log::info!(
                    "{peer} disconnected after {} messages ({} completion polls)",
                    stats.messages,
                    stats.completion_polls
                ),
                Err(err) => log::warn!("connection to {peer} failed: {err}"),
            }
        });
        if let Err(err) = spawned {
            log::warn!("could not spawn worker for {peer}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_caps_concurrent_connections() {
        let gate = Arc::new(AdmissionGate::new(2));
        let first = gate.try_acquire().unwrap();
        let second = gate.try_acquire().unwrap();
        assert_eq!(gate.active(), 2);

        // Third concurrent connection is rejected while two are still live
        assert!(gate.try_acquire().is_none());

        drop(first);
        assert_eq!(gate.active(), 1);
        let third = gate.try_acquire().unwrap();
        assert_eq!(gate.active(), 2);
        drop(second);
        drop(third);
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn handler_starts_in_created_phase() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = std::net::TcpStream::connect(addr).unwrap();
        let _accepted = listener.accept().unwrap();

        let stream = TcpStream::from_std(a, &crate::config::NetConfig::default()).unwrap();
        let handler = ConnectionHandler::new(stream, Strategy::FullCopy);
        assert_eq!(handler.phase(), Phase::Created);
    }
}
