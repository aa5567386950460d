//! Reusable buffers for driving one protocol exchange.

/// Buffers shared between a connection and the state machine it drives.
pub struct BufferSet {
    /// Payload of the last message read from the server
    pub read_buffer: Vec<u8>,
    /// Outgoing bytes staged by a state machine
    pub write_buffer: Vec<u8>,
    /// RowDescription payload retained while rows are streamed
    pub column_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::new(),
            type_byte: 0,
        }
    }

    /// Clear all buffers, preserving capacity.
    pub fn reset(&mut self) {
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.column_buffer.clear();
        self.type_byte = 0;
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
