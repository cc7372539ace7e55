//! Framed command channel over a byte-stream transport
//!
//! One pump task per attached stream reads inbound frames and drains the
//! outbound queue. `Front` frames are pushed ahead of queued traffic,
//! `Bypass` sends lock the writer and go out immediately.

use super::{CommandChannel, FrameHandler, Priority, QueueMode};
use crate::transport::TransportStream;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use linkwatch_shared::codec::{self, FrameDecoder};
use linkwatch_shared::{Frame, MessageKind};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type BoxedStream = Box<dyn TransportStream>;

/// Outbound frames waiting for the pump
#[derive(Debug, Default)]
struct OutboundQueue {
    frames: VecDeque<Bytes>,
}

impl OutboundQueue {
    fn push(&mut self, bytes: Bytes, priority: Priority) {
        match priority {
            Priority::Normal => self.frames.push_back(bytes),
            Priority::Front => self.frames.push_front(bytes),
        }
    }

    fn pop(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

struct Inner {
    queue: Mutex<OutboundQueue>,
    queue_ready: Notify,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    attached: AtomicBool,
    /// Bumped on every attach so a stale pump cannot detach a newer stream
    generation: AtomicU64,
    last_received: Mutex<Option<Instant>>,
    subscribers: RwLock<HashMap<MessageKind, FrameHandler>>,
    inbound_tx: mpsc::Sender<Frame>,
    pump: Mutex<Option<JoinHandle<()>>>,
    peer: Mutex<Option<String>>,
}

/// Command channel that frames messages with the shared codec
#[derive(Clone)]
pub struct FramedChannel {
    inner: Arc<Inner>,
}

impl FramedChannel {
    /// Create a detached channel
    ///
    /// Inbound frames with no subscriber for their kind are forwarded to the
    /// returned receiver (dropped with a warning when it is full).
    pub fn new(inbound_capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let inner = Inner {
            queue: Mutex::new(OutboundQueue::default()),
            queue_ready: Notify::new(),
            writer: tokio::sync::Mutex::new(None),
            attached: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_received: Mutex::new(None),
            subscribers: RwLock::new(HashMap::new()),
            inbound_tx,
            pump: Mutex::new(None),
            peer: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            inbound_rx,
        )
    }

    /// Bind a freshly opened stream, replacing any previous one
    pub async fn attach<S: TransportStream>(&self, stream: S) {
        let _ = self.detach().await;

        let label = stream.peer_label();
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.inner.writer.lock().await = Some(writer);
        *self.inner.peer.lock() = Some(label.clone());
        self.inner.attached.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(pump(self.inner.clone(), reader, generation));
        *self.inner.pump.lock() = Some(pump);

        info!("[CHANNEL] Attached to {}", label);
    }

    /// Whether a stream is currently bound
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Label of the bound stream's remote end
    pub fn peer(&self) -> Option<String> {
        self.inner.peer.lock().clone()
    }

    async fn detach(&self) -> Result<()> {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.attached.store(false, Ordering::SeqCst);
        self.inner.queue.lock().clear();
        let peer = self.inner.peer.lock().take();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
            if let Some(peer) = peer {
                info!("[CHANNEL] Detached from {}", peer);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandChannel for FramedChannel {
    async fn send(&self, frame: Frame, priority: Priority, mode: QueueMode) -> Result<()> {
        if !self.is_attached() {
            bail!("Channel not attached");
        }

        let encoded = codec::encode(&frame)?;
        match mode {
            QueueMode::Queued => {
                self.inner.queue.lock().push(encoded, priority);
                self.inner.queue_ready.notify_one();
            }
            QueueMode::Bypass => {
                let mut guard = self.inner.writer.lock().await;
                let writer = guard.as_mut().ok_or_else(|| anyhow!("Channel not attached"))?;
                writer.write_all(&encoded).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    fn last_received(&self) -> Option<Instant> {
        *self.inner.last_received.lock()
    }

    fn subscribe(&self, kind: MessageKind, handler: FrameHandler) {
        self.inner.subscribers.write().insert(kind, handler);
    }

    async fn close(&self) -> Result<()> {
        self.detach().await
    }
}

/// Per-stream task: read inbound frames, drain the outbound queue
async fn pump(inner: Arc<Inner>, mut reader: ReadHalf<BoxedStream>, generation: u64) {
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let reason = loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        if decoder.buffer_len() > 0 {
                            debug!("[CHANNEL] {} bytes of a partial frame discarded", decoder.buffer_len());
                        }
                        break "peer closed the stream".to_string();
                    }
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);
                        if let Err(e) = drain_inbound(&inner, &mut decoder) {
                            break format!("decode error: {e}");
                        }
                    }
                    Err(e) => break format!("read error: {e}"),
                }
            }

            _ = inner.queue_ready.notified() => {
                if let Err(e) = drain_outbound(&inner).await {
                    break format!("write error: {e}");
                }
            }
        }
    };

    warn!("[CHANNEL] Stream lost: {}", reason);

    if inner.generation.load(Ordering::SeqCst) == generation {
        inner.attached.store(false, Ordering::SeqCst);
        inner.writer.lock().await.take();
        inner.peer.lock().take();
    }
}

fn drain_inbound(inner: &Inner, decoder: &mut FrameDecoder) -> Result<(), codec::CodecError> {
    while let Some(frame) = decoder.decode_next()? {
        *inner.last_received.lock() = Some(Instant::now());

        let handler = frame
            .kind()
            .and_then(|kind| inner.subscribers.read().get(&kind).cloned());

        match handler {
            Some(handler) => handler(&frame),
            None => match inner.inbound_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    warn!("[CHANNEL] Inbound queue full, dropped seq={}", frame.sequence_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("[CHANNEL] No inbound receiver, frame dropped");
                }
            },
        }
    }
    Ok(())
}

async fn drain_outbound(inner: &Inner) -> std::io::Result<()> {
    loop {
        let next = inner.queue.lock().pop();
        let Some(bytes) = next else {
            return Ok(());
        };

        let mut guard = inner.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
    }
}
