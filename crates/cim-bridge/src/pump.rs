//! Delimiter framing for the outbound (child stdout → client) direction.
//!
//! The child writes a byte stream; clients expect discrete frames. The
//! scanner accumulates stdout bytes and cuts a frame at every delimiter
//! occurrence, delimiter included (it is the child's line terminator and
//! the client's frame terminator alike).

use cim_core::Delimiter;

/// Accumulation cap before an unterminated buffer is force-flushed.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One cut frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes, delimiter included when `terminated`
    pub bytes: Vec<u8>,

    /// False when the frame was force-flushed without a delimiter
    /// (oversized buffer or final partial chunk at child exit)
    pub terminated: bool,
}

/// Incremental delimiter scanner over a byte stream.
pub struct FrameScanner {
    delimiter: Delimiter,
    buffer: Vec<u8>,
}

impl FrameScanner {
    /// Creates a scanner cutting on `delimiter`.
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            buffer: Vec::new(),
        }
    }

    /// Bytes currently buffered without a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds bytes in; returns every frame completed by them.
    ///
    /// If the buffer grows past `MAX_FRAME_SIZE` with no delimiter in
    /// sight, the whole buffer is flushed as one unterminated frame so
    /// a delimiter-less child cannot pin memory indefinitely.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.delimiter.find(&self.buffer) {
            let cut = pos + self.delimiter.len();
            frames.push(Frame {
                bytes: self.buffer.drain(..cut).collect(),
                terminated: true,
            });
        }

        if self.buffer.len() > MAX_FRAME_SIZE {
            frames.push(Frame {
                bytes: std::mem::take(&mut self.buffer),
                terminated: false,
            });
        }

        frames
    }

    /// Flushes whatever remains as a final unterminated frame.
    ///
    /// Called at child exit so a trailing chunk with no delimiter is
    /// still delivered.
    pub fn finish(mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(Frame {
                bytes: std::mem::take(&mut self.buffer),
                terminated: false,
            })
        }
    }
}
