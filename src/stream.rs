//! Async socket stream for the wire protocol.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::buffer_set::BufferSet;

/// Buffered TCP stream carrying one PostgreSQL session.
pub(crate) struct Stream {
    inner: BufReader<TcpStream>,
}

impl Stream {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub(crate) async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.inner.read_u8().await
    }

    /// Read one backend message into the buffer set: type byte, length,
    /// then `length - 4` payload bytes.
    pub(crate) async fn read_message(&mut self, buffer_set: &mut BufferSet) -> std::io::Result<()> {
        buffer_set.type_byte = self.inner.read_u8().await?;

        let mut length_bytes = [0u8; 4];
        self.inner.read_exact(&mut length_bytes).await?;
        let length = u32::from_be_bytes(length_bytes) as usize;

        let payload_len = length.saturating_sub(4);
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.inner.read_exact(&mut buffer_set.read_buffer).await?;

        Ok(())
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.get_mut().write_all(buf).await
    }

    pub(crate) async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.get_mut().flush().await
    }
}
