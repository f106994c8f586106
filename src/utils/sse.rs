use bytes::{Bytes, BytesMut};

/// Reassembles an event-stream body into whole lines across chunk
/// boundaries. The relay must hand each line downstream exactly as the
/// backend produced it, so lines keep their original terminators and no
/// parsing or re-serialization happens here.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: BytesMut,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line completed by it, terminator
    /// included. Bytes after the last newline stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            lines.push(self.buffer.split_to(pos + 1).freeze());
        }
        lines
    }

    /// Drains whatever is left after EOF: a final line the backend never
    /// terminated.
    pub fn take_remaining(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer).freeze())
        }
    }
}
