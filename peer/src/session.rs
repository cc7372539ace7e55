//! One link session seen from the peer side

use anyhow::Result;
use linkwatch_shared::codec::{self, FrameDecoder};
use linkwatch_shared::{frame, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cloneable handle used to write frames to the manager
pub struct SessionHandle<S> {
    pub label: String,
    writer: Arc<Mutex<WriteHalf<S>>>,
    sequence_id: Arc<AtomicU64>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            writer: self.writer.clone(),
            sequence_id: self.sequence_id.clone(),
        }
    }
}

impl<S: AsyncWrite> SessionHandle<S> {
    pub fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Encode and write one frame
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let encoded = codec::encode(frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Behaviour knobs for a session
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// Stop answering challenges once the session is this old
    pub mute_after: Option<std::time::Duration>,
}

/// Active session over any byte stream
pub struct PeerSession<S> {
    handle: SessionHandle<S>,
    reader: ReadHalf<S>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    config: SessionConfig,
    connected_at: Instant,
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> PeerSession<S> {
    pub fn new(stream: S, label: impl Into<String>, config: SessionConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            handle: SessionHandle {
                label: label.into(),
                writer: Arc::new(Mutex::new(writer)),
                sequence_id: Arc::new(AtomicU64::new(0)),
            },
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            config,
            connected_at: Instant::now(),
        }
    }

    pub fn handle(&self) -> SessionHandle<S> {
        self.handle.clone()
    }

    /// Read the next frame; `None` once the stream is closed or corrupt
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!("[PEER] Decode error from {}: {}", self.handle.label, e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("[PEER] Read error from {}: {}", self.handle.label, e);
                    return None;
                }
            }
        }
    }

    fn muted(&self) -> bool {
        matches!(self.config.mute_after, Some(after) if self.connected_at.elapsed() >= after)
    }

    /// Serve the session until the manager hangs up
    pub async fn run(mut self) -> Result<()> {
        info!("[PEER] Session opened: {}", self.handle.label);

        while let Some(frame) = self.recv().await {
            match &frame.payload {
                Some(frame::Payload::Ping(ping)) => {
                    if self.muted() {
                        debug!("[PEER] Muted, ignoring challenge {}", ping.nonce);
                        continue;
                    }
                    let reply = Frame::pong(self.handle.next_sequence_id(), ping.nonce);
                    self.handle.send(&reply).await?;
                    debug!("[PEER] Answered challenge {}", ping.nonce);
                }
                Some(frame::Payload::Pong(pong)) => {
                    debug!("[PEER] Pong {} from {}", pong.nonce, self.handle.label);
                }
                Some(frame::Payload::Data(data)) => {
                    info!(
                        "[PEER] seq={} DATA: {} bytes",
                        frame.sequence_id,
                        data.body.len()
                    );
                }
                None => warn!("[PEER] Frame without payload, seq={}", frame.sequence_id),
            }
        }

        info!("[PEER] Session closed: {}", self.handle.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkwatch_shared::MessageKind;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    async fn read_frame(stream: &mut DuplexStream, decoder: &mut FrameDecoder) -> Option<Frame> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = decoder.decode_next().expect("valid frame") {
                return Some(frame);
            }
            let n = stream.read(&mut buf).await.expect("read");
            if n == 0 {
                return None;
            }
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_ping_answered_with_matching_pong() {
        let (mut manager, remote) = tokio::io::duplex(4096);
        let session = PeerSession::new(remote, "duplex", SessionConfig::default());
        let task = tokio::spawn(session.run());

        let encoded = codec::encode(&Frame::ping(1, 77)).expect("encode");
        manager.write_all(&encoded).await.expect("write");

        let mut decoder = FrameDecoder::new();
        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut manager, &mut decoder),
        )
        .await
        .expect("reply in time")
        .expect("stream open");
        assert_eq!(reply.kind(), Some(MessageKind::Pong));
        assert_eq!(reply.nonce(), Some(77));

        drop(manager);
        task.await.expect("join").expect("clean close");
    }

    #[tokio::test]
    async fn test_muted_session_ignores_ping() {
        let (mut manager, remote) = tokio::io::duplex(4096);
        let config = SessionConfig {
            mute_after: Some(Duration::ZERO),
        };
        let session = PeerSession::new(remote, "duplex", config);
        let task = tokio::spawn(session.run());

        let encoded = codec::encode(&Frame::ping(1, 5)).expect("encode");
        manager.write_all(&encoded).await.expect("write");
        manager.shutdown().await.expect("shutdown");

        let mut decoder = FrameDecoder::new();
        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut manager, &mut decoder),
        )
        .await
        .expect("eof in time");
        assert!(reply.is_none());

        task.await.expect("join").expect("clean close");
    }
}
