//! TCP transport implementation
//!
//! The game plugin connects to the bridge over TCP. Frames are either
//! newline terminated or, for legacy peers, one frame per read.

use crate::protocol::FRAME_DELIMITER;
use crate::transport::{AsyncReader, AsyncWriter};
use async_trait::async_trait;
use surfchan_core::{Framing, Result, SurfError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Upper bound on a single frame. Telemetry frames are well under 1 KB.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Read buffer for datagram framing
const DATAGRAM_READ_LEN: usize = 8000;

/// TCP read wrapper
pub struct TcpReadWrapper {
    inner: BufReader<OwnedReadHalf>,
    framing: Framing,
    line: Vec<u8>,
}

impl TcpReadWrapper {
    pub fn new(half: OwnedReadHalf, framing: Framing) -> Self {
        Self {
            inner: BufReader::new(half),
            framing,
            line: Vec::new(),
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        self.line.clear();
        loop {
            let available = self
                .inner
                .fill_buf()
                .await
                .map_err(|e| SurfError::IpcError(format!("TCP read failed: {}", e)))?;

            if available.is_empty() {
                // EOF: hand out a trailing unterminated frame before reporting closure
                if self.line.is_empty() {
                    return Err(SurfError::IpcError("connection closed by peer".into()));
                }
                return Ok(std::mem::take(&mut self.line));
            }

            match available.iter().position(|&b| b == FRAME_DELIMITER) {
                Some(pos) => {
                    self.line.extend_from_slice(&available[..pos]);
                    self.inner.consume(pos + 1);
                    return Ok(std::mem::take(&mut self.line));
                }
                None => {
                    let len = available.len();
                    self.line.extend_from_slice(available);
                    self.inner.consume(len);
                }
            }

            if self.line.len() > MAX_FRAME_LEN {
                return Err(SurfError::IpcError(format!(
                    "Frame too large: over {} bytes without a delimiter",
                    MAX_FRAME_LEN
                )));
            }
        }
    }

    async fn read_datagram(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; DATAGRAM_READ_LEN];
        let n = self
            .inner
            .read(&mut buf)
            .await
            .map_err(|e| SurfError::IpcError(format!("TCP read failed: {}", e)))?;
        if n == 0 {
            return Err(SurfError::IpcError("connection closed by peer".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

#[async_trait]
impl AsyncReader for TcpReadWrapper {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        match self.framing {
            Framing::Newline => self.read_line().await,
            Framing::Datagram => self.read_datagram().await,
        }
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper {
    inner: OwnedWriteHalf,
    framing: Framing,
}

impl TcpWriteWrapper {
    pub fn new(half: OwnedWriteHalf, framing: Framing) -> Self {
        Self {
            inner: half,
            framing,
        }
    }
}

#[async_trait]
impl AsyncWriter for TcpWriteWrapper {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.extend_from_slice(data);
        if self.framing == Framing::Newline {
            buf.push(FRAME_DELIMITER);
        }

        self.inner
            .write_all(&buf)
            .await
            .map_err(|e| SurfError::IpcError(format!("TCP write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.inner
            .flush()
            .await
            .map_err(|e| SurfError::IpcError(format!("TCP flush failed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair(framing: Framing) -> (TcpReadWrapper, TcpWriteWrapper, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (r, w) = stream.into_split();
        (
            TcpReadWrapper::new(r, framing),
            TcpWriteWrapper::new(w, framing),
            peer,
        )
    }

    #[tokio::test]
    async fn test_newline_framing_splits_coalesced_frames() {
        let (mut reader, _writer, mut peer) = pair(Framing::Newline).await;

        // Two frames in one write, a third split across writes
        peer.write_all(b"1:a\n3:b\n4:").await.unwrap();
        peer.flush().await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), b"1:a");
        assert_eq!(reader.read_message().await.unwrap(), b"3:b");

        peer.write_all(b"c\n").await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), b"4:c");

        // Unterminated tail is delivered at EOF, then closure is reported
        peer.write_all(b"2:tail").await.unwrap();
        drop(peer);
        assert_eq!(reader.read_message().await.unwrap(), b"2:tail");
        assert!(reader.read_message().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_terminates_frames() {
        let (_reader, mut writer, mut peer) = pair(Framing::Newline).await;
        writer.write_message(b"3:1,f,1.0,0.0").await.unwrap();

        let mut buf = [0u8; 14];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"3:1,f,1.0,0.0\n");
    }

    #[tokio::test]
    async fn test_datagram_framing_reads_whole_writes() {
        let (mut reader, mut writer, mut peer) = pair(Framing::Datagram).await;

        peer.write_all(b"1:127.0.0.1:27015").await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), b"1:127.0.0.1:27015");

        writer.write_message(b"4:").await.unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"4:");

        drop(peer);
        assert!(reader.read_message().await.is_err());
    }
}
