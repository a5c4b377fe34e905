//! Per-test output capture.
//!
//! Code under test writes through [`Redirector`] handles instead of the
//! process streams. While a [`CaptureGuard`] is alive, everything written to
//! either handle lands in one shared buffer; otherwise writes pass straight
//! through to the real stdout/stderr.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Shared {
    buffer: Vec<u8>,
    active: bool,
}

/// Owner of the capture buffer. One per collector.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    shared: Arc<Mutex<Shared>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle that stands in for the process stdout.
    pub fn stdout(&self) -> Redirector {
        Redirector {
            shared: Arc::clone(&self.shared),
            stream: Stream::Stdout,
        }
    }

    /// Handle that stands in for the process stderr.
    pub fn stderr(&self) -> Redirector {
        Redirector {
            shared: Arc::clone(&self.shared),
            stream: Stream::Stderr,
        }
    }

    /// Truncate the buffer and start redirecting into it.
    pub fn begin(&self) -> CaptureGuard {
        let mut shared = self.lock();
        shared.buffer.clear();
        shared.active = true;
        CaptureGuard {
            capture: self.clone(),
            released: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Everything captured since the last `begin`. Still readable after the
    /// guard is released.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock().buffer).into_owned()
    }
}

/// Scoped capture. Redirection ends on `release` or on drop, whichever
/// comes first.
#[derive(Debug)]
pub struct CaptureGuard {
    capture: OutputCapture,
    released: bool,
}

impl CaptureGuard {
    /// Restore the original targets. Only the first call has an effect.
    pub fn release(&mut self) {
        if !self.released {
            self.capture.lock().active = false;
            self.released = true;
        }
    }

    /// Release and hand back the captured text.
    pub fn finish(mut self) -> String {
        self.release();
        self.capture.contents()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Writer that forwards to the active capture buffer, or to the original
/// stream when no capture is running.
#[derive(Debug, Clone)]
pub struct Redirector {
    shared: Arc<Mutex<Shared>>,
    stream: Stream,
}

impl Write for Redirector {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            if shared.active {
                shared.buffer.extend_from_slice(buf);
                return Ok(buf.len());
            }
        }
        match self.stream {
            Stream::Stdout => io::stdout().write(buf),
            Stream::Stderr => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        }
    }
}
