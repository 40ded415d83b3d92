//! Receive accumulator for mode detection.

/// Bytes received since the last recognised response.
///
/// Appended to on every read and cleared only once a response has been
/// fully interpreted, so classification always sees everything the module
/// has sent since then.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
}

impl ReceiveBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    /// Take the accumulated bytes, leaving the buffer empty.
    pub fn take_and_clear(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Accumulated bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of accumulated bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}
