//! User-visible output channel.
//!
//! Step names in debug mode and size warnings are part of what a caller
//! observes, so they go to an explicit sink rather than the tracing
//! subscriber. Tests swap the sink for a [`SharedBuffer`].

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub struct Output {
    sink: Box<dyn Write>,
}

impl Output {
    pub fn new(sink: impl Write + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Discards everything.
    pub fn sink() -> Self {
        Self::new(io::sink())
    }

    /// An output whose contents can be read back through the returned buffer.
    pub fn buffer() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    pub fn line(&mut self, message: impl Display) {
        // A closed stdout must not fail the build.
        let _ = writeln!(self.sink, "{}", message);
        let _ = self.sink.flush();
    }

    /// `[<index>] <name>`, printed before a step runs in debug mode.
    pub fn step(&mut self, index: usize, name: &str) {
        self.line(format_args!("[{}] {}", index, name));
    }

    pub fn warn(&mut self, message: impl Display) {
        tracing::warn!("{}", message);
        self.line(message);
    }

    pub fn error(&mut self, message: impl Display) {
        self.line(format_args!("Error: {}", message));
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::stdout()
    }
}

/// In-memory sink shared between an [`Output`] and the code inspecting it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("output buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
