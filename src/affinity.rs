//! CPU affinity for worker threads
//!
//! Pinning each connection worker to its own core keeps the per-connection
//! latency numbers comparable across runs: no migrations, stable caches.
//! The accept loop hands out target CPUs round-robin when pinning is
//! enabled in the benchmark configuration.

use std::io;

/// Number of logical CPU cores available to the process, or 1 if detection
/// fails.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pins the calling thread to one CPU core (0-based).
///
/// # Platform Support
///
/// - **Linux/Android/FreeBSD**: `sched_setaffinity`
/// - **Other platforms**: no-op, returns success without pinning
pub fn pin_to_cpu(cpu: usize) -> io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))] {
            pin_to_cpu_unix(cpu)
        } else {
            let _ = cpu;
            Ok(())
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn pin_to_cpu_unix(cpu: usize) -> io::Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};

    if cpu >= 1024 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "CPU number too large (max 1023)",
        ));
    }

    unsafe {
        let mut set: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut set);
        CPU_SET(cpu, &mut set);

        if sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_is_positive() {
        assert!(cpu_count() >= 1);
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn oversized_cpu_rejected() {
        assert!(pin_to_cpu(4096).is_err());
    }
}
