//! # Logging Setup and Utilities
//!
//! The crate logs through the `log` facade; the binary initializes
//! `env_logger`. [`LogThrottle`] rate-limits per-frame error paths so a
//! misbehaving device cannot flood the logs.

use std::time::Instant;

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Rate limiter for log messages: at most `cap` messages per window.
#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    count: u32,
    t0: Instant,
}

impl LogThrottle {
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            t0: Instant::now(),
        }
    }

    /// Whether the next message should be logged. Resets the counter when
    /// the window has elapsed.
    pub fn allow(&mut self) -> bool {
        let elapsed_ms = self.t0.elapsed().as_millis() as u64;
        if elapsed_ms > self.window_ms {
            self.t0 = Instant::now();
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.cap
    }
}

/// Log frame bytes in hex, truncated to keep log lines bounded.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 64;

    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };
    log::debug!("{prefix}: {}{suffix}", hex::encode(shown));
}
