//! Output sinks for console output produced by R code
//!
//! A session owns exactly one sink, supplied when it is opened. Everything R
//! prints while evaluating is delivered there in evaluation order, as it is
//! produced, and never mixed into return values.

use parking_lot::Mutex;
use rlink_logger as logger;
use std::io::Write;
use std::sync::Arc;

/// Which console stream a chunk was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Regular output (`print`, `cat`)
    Stdout,
    /// Diagnostics (`message`, warnings)
    Message,
}

/// Receiver of runtime console output
pub trait OutputSink: Send {
    fn write(&mut self, chunk: &str, stream: OutputStream);
}

impl<F> OutputSink for F
where
    F: FnMut(&str, OutputStream) + Send,
{
    fn write(&mut self, chunk: &str, stream: OutputStream) {
        self(chunk, stream)
    }
}

/// Forwards output to the host process's stdout and stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&mut self, chunk: &str, stream: OutputStream) {
        // A closed host stdout must not fail the evaluation that printed
        let _ = match stream {
            OutputStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(chunk.as_bytes()).and_then(|()| out.flush())
            }
            OutputStream::Message => std::io::stderr().write_all(chunk.as_bytes()),
        };
    }
}

/// Records output in memory; clones share the same transcript
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    chunks: Arc<Mutex<Vec<(OutputStream, String)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to `Stdout`, concatenated
    pub fn stdout(&self) -> String {
        self.collect(OutputStream::Stdout)
    }

    /// Everything written to `Message`, concatenated
    pub fn messages(&self) -> String {
        self.collect(OutputStream::Message)
    }

    /// The raw transcript in arrival order
    pub fn chunks(&self) -> Vec<(OutputStream, String)> {
        self.chunks.lock().clone()
    }

    pub fn clear(&self) {
        self.chunks.lock().clear();
    }

    fn collect(&self, stream: OutputStream) -> String {
        self.chunks
            .lock()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, chunk)| chunk.as_str())
            .collect()
    }
}

impl OutputSink for CaptureSink {
    fn write(&mut self, chunk: &str, stream: OutputStream) {
        self.chunks.lock().push((stream, chunk.to_string()));
    }
}

/// Wraps the session sink for the duration of one call and mirrors each
/// chunk into the log when runtime output logging is on
pub(crate) struct Tee<'a> {
    pub(crate) inner: &'a mut dyn OutputSink,
}

impl OutputSink for Tee<'_> {
    fn write(&mut self, chunk: &str, stream: OutputStream) {
        if chunk.is_empty() {
            return;
        }
        logger::runtime(chunk);
        self.inner.write(chunk, stream);
    }
}
