//! Dedicated writer task serializing all outbound boxes.
//!
//! A connection has exactly one writer task; handlers and callers submit
//! encoded boxes through a cloneable [`WriterHandle`] (mpsc). This is what
//! guarantees that only one box is in flight on the wire at a time, without
//! a mutex around the stream.
//!
//! ```text
//! handler 1 ─┐
//! handler 2 ─┼─► mpsc::Sender<OutboundBox> ─► writer task ─► byte stream
//! caller   ──┘
//! ```
//!
//! An [`OutboundBox`] may carry an `on_sent` hook. The hook runs exactly
//! once, strictly after the box bytes have been written and flushed, and
//! never runs if the write fails. The virtual-channel establishment answer
//! uses this to start its transport at the moment the answer is handed off,
//! keeping side effects out of box construction.
//!
//! Backpressure: submissions are tracked with a pending count; at capacity,
//! `send` waits up to a configured timeout and `try_send` fails fast.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WireError};

/// Default maximum pending boxes before backpressure kicks in.
pub(crate) const DEFAULT_MAX_PENDING_BOXES: usize = 1024;

/// Default writer channel capacity.
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub(crate) const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum boxes drained per write batch.
const MAX_BATCH_SIZE: usize = 64;

/// Hook invoked once a box has been handed to the transport.
pub(crate) type SentHook = Box<dyn FnOnce() + Send + 'static>;

/// An encoded box queued for the writer task.
pub(crate) struct OutboundBox {
    /// Encoded wire bytes of the box.
    pub data: Bytes,
    /// Invoked after the bytes are written and flushed; dropped unrun if the
    /// write fails.
    pub on_sent: Option<SentHook>,
}

impl OutboundBox {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            on_sent: None,
        }
    }

    pub fn with_hook(data: Bytes, hook: SentHook) -> Self {
        Self {
            data,
            on_sent: Some(hook),
        }
    }
}

impl std::fmt::Debug for OutboundBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundBox")
            .field("len", &self.data.len())
            .field("has_hook", &self.on_sent.is_some())
            .finish()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub(crate) struct WriterConfig {
    pub max_pending_boxes: usize,
    pub channel_capacity: usize,
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_boxes: DEFAULT_MAX_PENDING_BOXES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for submitting boxes to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<OutboundBox>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Submit a box, waiting out backpressure up to the configured timeout.
    pub async fn send(&self, bx: OutboundBox) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_capacity().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(bx).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            WireError::ConnectionLost
        })
    }

    /// Submit a box without waiting; fails fast at capacity.
    pub fn try_send(&self, bx: OutboundBox) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(WireError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(bx).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => WireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => WireError::ConnectionLost,
            }
        })
    }

    /// Current pending box count.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn wait_for_capacity(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(WireError::BackpressureTimeout);
            }
            tokio::time::sleep(check_interval).await;
        }
    }
}

/// Spawn the writer task over the write half of the connection stream.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_boxes,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (handle, task)
}

/// Receive boxes, write them in batches, then run their hooks.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundBox>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(bx) => bx,
            None => return Ok(()), // all handles dropped, clean shutdown
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(bx) => batch.push(bx),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        for i in 0..batch.len() {
            if let Err(e) = writer.write_all(&batch[i].data).await {
                pending.fetch_sub(batch_size, Ordering::Release);
                tracing::error!("writer task stopping on write failure: {}", e);
                return Err(WireError::Io(e));
            }
        }
        if let Err(e) = writer.flush().await {
            pending.fetch_sub(batch_size, Ordering::Release);
            tracing::error!("writer task stopping on flush failure: {}", e);
            return Err(WireError::Io(e));
        }

        pending.fetch_sub(batch_size, Ordering::Release);

        // bytes are on the wire; fire hooks in send order
        for bx in batch {
            if let Some(hook) = bx.on_sent {
                hook();
            }
        }
    }
}
