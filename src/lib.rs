#![deny(unsafe_op_in_unsafe_fn)]

pub mod affinity;
pub mod buf;
pub mod completion;
pub mod config;
pub mod error;
pub mod measure;
pub mod message;
pub mod raw; // OS-level socket helpers (Unix)
pub mod strategy;
pub mod tcp;
pub mod worker;

/// Convenience re-exports
pub use config::{apply_socket_tuning, BenchConfig, NetConfig};
pub use error::{Error, Result};
pub use measure::Report;
pub use message::{field_marker, Message, FIELD_COUNT};
pub use strategy::{SendStats, Sender, Strategy};
pub use worker::{serve, AdmissionGate, ConnectionHandler};
