//! Terminal logging setup.
//!
//! Fetch failures and probe reports can carry whole response bodies in their
//! fields. The fmt layer writes through [`TruncatingStderr`], which buffers
//! one event at a time and caps it before it reaches the terminal.
//!
//! ```text
//! tracing::warn!(error = %e, "Remote install failed")
//!        |
//!        v
//!   registry() + EnvFilter (RUST_LOG, default "suite_core=info")
//!        |
//!        \-- fmt::layer().with_writer(TruncatingStderr)  <-- caps each event
//!                \-- stderr
//! ```

use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Maximum bytes per event written to the terminal.
const MAX_EVENT_BYTES: usize = 1024;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "suite_core=info";

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "suite_core=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(TruncatingStderr::default()),
        )
        .try_init();
}

#[derive(Clone)]
enum Sink {
    Stderr,
    #[cfg(test)]
    Memory(Arc<Mutex<Vec<u8>>>),
}

/// `MakeWriter` producing one capped buffer per event.
#[derive(Clone)]
pub struct TruncatingStderr {
    max_bytes: usize,
    sink: Sink,
}

impl Default for TruncatingStderr {
    fn default() -> Self {
        Self {
            max_bytes: MAX_EVENT_BYTES,
            sink: Sink::Stderr,
        }
    }
}

impl TruncatingStderr {
    #[cfg(test)]
    fn capturing(max_bytes: usize) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let writer = Self {
            max_bytes,
            sink: Sink::Memory(Arc::clone(&captured)),
        };
        (writer, captured)
    }
}

impl<'a> MakeWriter<'a> for TruncatingStderr {
    type Writer = EventBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        EventBuffer {
            buf: Vec::with_capacity(256),
            max_bytes: self.max_bytes,
            sink: self.sink.clone(),
        }
    }
}

/// Accumulates one event and emits it, capped, when dropped.
pub struct EventBuffer {
    buf: Vec<u8>,
    max_bytes: usize,
    sink: Sink,
}

impl Write for EventBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Largest char boundary in `bytes` that is `<= pos`.
fn char_floor(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos.min(bytes.len());
    // Continuation bytes look like 0b10xxxxxx.
    while i > 0 && i < bytes.len() && bytes[i] & 0xC0 == 0x80 {
        i -= 1;
    }
    i
}

fn cap_event(buf: &[u8], max_bytes: usize) -> Vec<u8> {
    if buf.len() <= max_bytes {
        return buf.to_vec();
    }
    let cut = char_floor(buf, max_bytes);
    let head = buf[..cut].strip_suffix(b"\n").unwrap_or(&buf[..cut]);
    let mut out = Vec::with_capacity(head.len() + 32);
    out.extend_from_slice(head);
    out.extend_from_slice(format!(" ...[{}B total]\n", buf.len()).as_bytes());
    out
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let output = cap_event(&self.buf, self.max_bytes);
        match &self.sink {
            Sink::Stderr => {
                let _ = io::stderr().write_all(&output);
            }
            #[cfg(test)]
            Sink::Memory(captured) => {
                if let Ok(mut captured) = captured.lock() {
                    captured.extend_from_slice(&output);
                }
            }
        }
    }
}
