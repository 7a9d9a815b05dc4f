//! Per-connection I/O: a read half that frames and decodes bytes into
//! `ControlPacket`s for the protocol worker, and a write half that drains
//! a client's outbound frame queue onto the socket.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use kindling_core::error::Error as CoreError;
use kindling_packets::ControlPacket;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;
const WRITE_BUFFER_CAPACITY: usize = 512;
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Buffers reads off a connection's read half and yields complete
/// `ControlPacket`s. Takes ownership of just the read half so the write
/// half can live on a separate task without any locking between them.
pub struct Connection {
    read_half: OwnedReadHalf,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            read_half,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Reads from the socket until a full packet is buffered, then parses
    /// and returns it. Returns `Ok(None)` on a clean EOF with nothing
    /// buffered (the peer closed its write half between packets).
    pub async fn read_packet(&mut self) -> kindling_core::Result<Option<ControlPacket>> {
        loop {
            if ControlPacket::check(&self.buffer).is_ok() {
                return Ok(Some(ControlPacket::parse(&mut self.buffer)?));
            }

            let n = self.read_half.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection reset while a packet was partially buffered",
                )));
            }
        }
    }
}

/// Drains `frames` onto `writer` until the channel closes or a write
/// fails, at which point the connection is torn down.
pub async fn run_write_task(writer: tokio::net::tcp::OwnedWriteHalf, mut frames: mpsc::Receiver<Bytes>) {
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, writer);

    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!(error = %e, "write failed, closing connection");
            return;
        }
        if frames.is_empty() {
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "flush failed, closing connection");
                return;
            }
        }
    }

    let _ = writer.flush().await;
}

/// Creates the per-client write-task channel pair, sized to absorb a burst
/// of fanned-out frames without blocking the protocol worker.
pub fn new_write_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(WRITE_QUEUE_CAPACITY)
}

pub fn log_read_error(client_id: &Arc<str>, err: &kindling_core::error::Error) {
    debug!(%client_id, error = %err, "connection read failed");
}
