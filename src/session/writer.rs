//! Dedicated writer task for outbound frames.
//!
//! All streams on a session share one transport write half. Frames are sent
//! through an mpsc channel to a single writer task, so concurrent streams
//! never contend on a lock and a slow handler cannot hold the pipe:
//!
//! ```text
//! stream 1 ─┐
//! stream 2 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► transport
//! stream N ─┘
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PeerwireError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Writer channel capacity. Bounded so producers suspend instead of queueing
/// unboundedly when the transport is slow.
const CHANNEL_CAPACITY: usize = 256;

/// Maximum frames drained per wakeup before flushing.
const MAX_BATCH_SIZE: usize = 32;

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for `Complete` / `Cancel`).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a new outbound frame with empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }
}

/// Handle for sending frames to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Send a frame to the writer task.
    ///
    /// Suspends while the channel is full. Fails with `ConnectionClosed` once
    /// the writer task has exited.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| PeerwireError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task exits cleanly when every `WriterHandle` clone has been dropped.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Receive frames and write them out, batching per wakeup so a burst of
/// stream elements flushes once.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        for frame in &batch {
            writer.write_all(&frame.header).await?;
            if !frame.payload.is_empty() {
                writer.write_all(&frame.payload).await?;
            }
        }
        writer.flush().await?;
    }
}
