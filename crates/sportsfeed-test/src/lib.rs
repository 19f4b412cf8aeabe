//! Helpers for testing the caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When a test asserts on log output, use [`capture_logs`] and hold on to the returned
//!    [`CapturedLogs`] for the whole test. The capture is scoped to the current thread, so such
//!    tests have to run on a current-thread runtime (the `#[tokio::test]` default).

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::dispatcher::DefaultGuard;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{MakeWriter, fmt};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `sportsfeed_cache` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("sportsfeed_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// An in-memory sink for formatted log lines.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    /// Returns everything that was logged so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Returns all logged lines containing `needle`.
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_owned)
            .collect()
    }

    /// Counts the logged lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines_containing(needle).len()
    }

    /// Forgets everything logged so far.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// The writer handed out by [`LogBuffer`] for every event.
pub struct LogBufferWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Log output captured on the current thread.
///
/// Capturing stops when this is dropped.
pub struct CapturedLogs {
    buffer: LogBuffer,
    _guard: DefaultGuard,
}

impl std::ops::Deref for CapturedLogs {
    type Target = LogBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

/// Captures all log output of the current thread, down to `TRACE` level.
pub fn capture_logs() -> CapturedLogs {
    let buffer = LogBuffer::default();
    let subscriber = fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_ansi(false)
        .with_target(false)
        .with_writer(buffer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);

    CapturedLogs {
        buffer,
        _guard: guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_logs() {
        let logs = capture_logs();
        tracing::warn!(id = "sr:competitor:1", "first line");
        tracing::debug!("second line");

        assert_eq!(logs.count("first line"), 1);
        assert_eq!(logs.count("sr:competitor:1"), 1);
        assert_eq!(logs.count("line"), 2);

        logs.clear();
        assert!(logs.contents().is_empty());
    }
}
