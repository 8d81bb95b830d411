//! Character-stream transport. One client at a time writes
//! newline-terminated frames and receives one reply per frame, terminated
//! by two carriage returns.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use perfektday_common::{config::TransportConfig, Frame, FrameAssembler, Response};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

const READ_CHUNK_BYTES: usize = 256;

/// Receives connection events and complete frames from the transport.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn set_connected(&self, connected: bool);

    async fn on_frame(&self, frame: &str) -> Response;
}

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub inactivity: Duration,
    pub max_frame_bytes: usize,
}

impl From<&TransportConfig> for SessionLimits {
    fn from(config: &TransportConfig) -> Self {
        Self {
            inactivity: Duration::from_secs(config.inactivity_timeout_secs),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Accepts clients one after another until the listener fails.
pub async fn serve(listener: TcpListener, sink: Arc<dyn FrameSink>, limits: SessionLimits) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("transport client connected from {peer}");
                sink.set_connected(true).await;
                if let Err(err) = serve_client(stream, sink.as_ref(), limits).await {
                    warn!("transport session with {peer} ended with error: {err}");
                }
                sink.set_connected(false).await;
                info!("transport client {peer} disconnected");
            }
            Err(err) => {
                warn!("transport accept failed: {err}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn serve_client(
    mut stream: TcpStream,
    sink: &dyn FrameSink,
    limits: SessionLimits,
) -> std::io::Result<()> {
    let mut assembler = FrameAssembler::new(limits.max_frame_bytes);
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    loop {
        let read = match tokio::time::timeout(limits.inactivity, stream.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) => {
                info!(
                    "dropping transport client after {}s of inactivity",
                    limits.inactivity.as_secs()
                );
                return Ok(());
            }
        };
        if read == 0 {
            return Ok(());
        }

        for frame in assembler.push(&chunk[..read]) {
            let response = match frame {
                Frame::Complete(line) => {
                    let response = sink.on_frame(&line).await;
                    debug!("frame {:?} -> {response}", line.trim_end());
                    response
                }
                Frame::Overflow => {
                    warn!(
                        "transport frame exceeded {} bytes, discarding",
                        limits.max_frame_bytes
                    );
                    Response::Error
                }
            };
            stream.write_all(&response.to_notification()).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use perfektday_common::protocol::Field;

    use super::*;

    #[derive(Default)]
    struct EchoSink {
        connected: AtomicBool,
        frames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FrameSink for EchoSink {
        async fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        async fn on_frame(&self, frame: &str) -> Response {
            self.frames.lock().unwrap().push(frame.to_string());
            Response::new(Field::PerfektDay, 1)
        }
    }

    async fn start(limits: SessionLimits) -> (Arc<EchoSink>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = Arc::new(EchoSink::default());
        tokio::spawn(serve(listener, sink.clone(), limits));
        (sink, TcpStream::connect(addr).await.unwrap())
    }

    async fn read_reply(stream: &mut TcpStream) -> String {
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];
        while !reply.ends_with(b"\r\r") {
            stream.read_exact(&mut byte).await.unwrap();
            reply.push(byte[0]);
        }
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn replies_to_frames_split_across_writes() {
        let (sink, mut client) = start(SessionLimits {
            inactivity: Duration::from_secs(5),
            max_frame_bytes: 64,
        })
        .await;

        client.write_all(b"PD").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"?\n").await.unwrap();

        assert_eq!(read_reply(&mut client).await, "PD;1\r\r");
        assert_eq!(sink.frames.lock().unwrap().as_slice(), ["PD?\n"]);
        assert!(sink.connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn oversized_frame_gets_error_reply() {
        let (sink, mut client) = start(SessionLimits {
            inactivity: Duration::from_secs(5),
            max_frame_bytes: 16,
        })
        .await;

        client.write_all(&[b'A'; 40]).await.unwrap();
        client.write_all(b"\n").await.unwrap();

        assert_eq!(read_reply(&mut client).await, "ERR\r\r");
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idle_client_is_disconnected() {
        let (sink, mut client) = start(SessionLimits {
            inactivity: Duration::from_millis(100),
            max_frame_bytes: 64,
        })
        .await;

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(read, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sink.connected.load(Ordering::SeqCst));
    }
}
