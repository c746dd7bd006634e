use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::TransportError;

/// Maximum total bytes accepted for a single frame, guarding against a
/// corrupt or hostile length prefix causing an unbounded allocation.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

async fn write_frames(writer: &mut OwnedWriteHalf, frames: &[Bytes]) -> Result<(), TransportError> {
    writer.write_u32(frames.len() as u32).await?;
    for frame in frames {
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

async fn read_frames(reader: &mut OwnedReadHalf) -> Result<Vec<Bytes>, TransportError> {
    let count = reader.read_u32().await?;
    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::MalformedFrame(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        frames.push(Bytes::from(buf));
    }
    Ok(frames)
}

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn fresh_identity() -> Bytes {
    let n = NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed);
    Bytes::from(format!("tcp-{n}").into_bytes())
}

/// Router half over TCP: one bound listener accepting many peer
/// connections, each assigned an opaque identity on accept.
pub struct StreamRouter {
    incoming: mpsc::UnboundedReceiver<(Bytes, Vec<Bytes>)>,
    writers: Arc<Mutex<HashMap<Bytes, Arc<tokio::sync::Mutex<OwnedWriteHalf>>>>>,
    local_addr: std::net::SocketAddr,
}

impl StreamRouter {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writers = Arc::new(Mutex::new(HashMap::new()));
        let writers_for_task = writers.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let identity = fresh_identity();
                let (mut read_half, write_half) = stream.into_split();
                writers_for_task
                    .lock()
                    .insert(identity.clone(), Arc::new(tokio::sync::Mutex::new(write_half)));
                let tx = tx.clone();
                let id = identity.clone();
                tokio::spawn(async move {
                    loop {
                        match read_frames(&mut read_half).await {
                            Ok(frames) => {
                                if tx.send((id.clone(), frames)).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Ok(Self { incoming: rx, writers, local_addr })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub async fn recv(&mut self) -> Result<(Bytes, Vec<Bytes>), TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    pub async fn try_recv(&mut self) -> Result<Option<(Bytes, Vec<Bytes>)>, TransportError> {
        match self.incoming.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    pub async fn send(&mut self, identity: &Bytes, frames: Vec<Bytes>) -> Result<(), TransportError> {
        let writer = self.writers.lock().get(identity).cloned();
        let Some(writer) = writer else {
            return Err(TransportError::Closed);
        };
        let mut guard = writer.lock().await;
        write_frames(&mut guard, &frames).await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writers.lock().clear();
        Ok(())
    }
}

/// Dealer half over TCP: a single outbound connection to a router.
pub struct StreamDealer {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
}

impl StreamDealer {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|_| TransportError::ConnectionRefused { address: addr.to_string() })?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self { read_half, write_half })
    }

    pub async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        write_frames(&mut self.write_half, &frames).await
    }

    pub async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        read_frames(&mut self.read_half).await
    }

    pub async fn try_recv(&mut self) -> Result<Option<Vec<Bytes>>, TransportError> {
        // A non-blocking peek isn't cheap to express over a plain stream
        // without a dedicated buffered-peek type; callers that need
        // non-blocking polling (the directory's waiting-peer sweep) use
        // `tokio::time::timeout` with a near-zero duration instead.
        match tokio::time::timeout(std::time::Duration::from_millis(0), self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.write_half.shutdown().await.map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dealer_to_router_round_trip() {
        let mut router = StreamRouter::bind("127.0.0.1:0").await.unwrap();
        let addr = router.local_addr().to_string();
        let mut dealer = StreamDealer::connect(&addr).await.unwrap();

        dealer.send(vec![Bytes::from_static(b"hello")]).await.unwrap();
        let (identity, frames) = router.recv().await.unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);

        router.send(&identity, vec![Bytes::from_static(b"world")]).await.unwrap();
        let reply = dealer.recv().await.unwrap();
        assert_eq!(reply, vec![Bytes::from_static(b"world")]);
    }

    #[tokio::test]
    async fn connect_to_nothing_is_refused() {
        let err = StreamDealer::connect("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }
}
