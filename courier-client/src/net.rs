//! The connection seam between the engine and the network.
//!
//! The engine only ever sees [`Connection`] — a pair of frame channels —
//! and obtains one through a [`ConnectionFactory`]. The provided
//! [`TcpConnectionFactory`] speaks the abridged MTProto framing over a
//! plain TCP socket; tests plug in [`LoopbackFactory`] instead.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use courier_mtproto::transport::{abridged_header, ABRIDGED_INIT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

// ─── Connection ──────────────────────────────────────────────────────────────

/// A live framed connection. Sending never blocks; receiving yields whole
/// MTProto frames with the transport framing already stripped.
pub struct Connection {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { tx, rx: Mutex::new(rx), closed: AtomicBool::new(false) }
    }

    /// Queue one frame for the wire.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), crate::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::Error::NotConnected);
        }
        self.tx
            .send(frame)
            .map_err(|_| crate::Error::NotConnected)
    }

    /// Wait for the next inbound frame. `None` once the peer is gone.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Creates connections to DC addresses.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(&self, addr: &str) -> io::Result<Connection>;
}

// ─── TCP + abridged framing ──────────────────────────────────────────────────

/// The production factory: TCP with abridged framing, one writer and one
/// reader task pumping frames between the socket and the channels.
pub struct TcpConnectionFactory;

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn open(&self, addr: &str) -> io::Result<Connection> {
        log::info!("[net] connecting to {addr}");
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            if write_half.write_all(&[ABRIDGED_INIT]).await.is_err() {
                return;
            }
            while let Some(frame) = out_rx.recv().await {
                if write_half.write_all(&abridged_header(frame.len())).await.is_err() {
                    break;
                }
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match read_abridged(&mut read_half).await {
                    Ok(frame) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("[net] read loop ended: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Connection::new(out_tx, in_rx))
    }
}

async fn read_abridged<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut first = [0u8; 1];
    reader.read_exact(&mut first).await?;
    let words = if first[0] < 0x7f {
        first[0] as usize
    } else {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest).await?;
        rest[0] as usize | (rest[1] as usize) << 8 | (rest[2] as usize) << 16
    };

    // A bare 4-byte packet is a transport-level error code.
    if words == 1 {
        let mut code = [0u8; 4];
        reader.read_exact(&mut code).await?;
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("transport error {}", i32::from_le_bytes(code)),
        ));
    }
    if words == 0 || words > 0x40000 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("implausible frame length ({words} words)"),
        ));
    }

    let mut frame = vec![0u8; words * 4];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

// ─── Loopback factory for tests and tools ────────────────────────────────────

/// Hands out connections whose peer side is exposed through
/// [`LoopbackFactory::endpoints`], so a test can play the server.
pub struct LoopbackFactory {
    endpoints: std::sync::Mutex<Vec<LoopbackPeer>>,
}

/// The server-side handles of one loopback connection.
pub struct LoopbackPeer {
    /// The address the client asked for.
    pub addr: String,
    /// Frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Push frames for the client to receive.
    pub to_client: mpsc::UnboundedSender<Vec<u8>>,
}

impl LoopbackFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { endpoints: std::sync::Mutex::new(Vec::new()) })
    }

    /// Take all connection peers opened so far.
    pub fn endpoints(&self) -> Vec<LoopbackPeer> {
        std::mem::take(&mut *self.endpoints.lock().unwrap())
    }
}

#[async_trait]
impl ConnectionFactory for LoopbackFactory {
    async fn open(&self, addr: &str) -> io::Result<Connection> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.endpoints.lock().unwrap().push(LoopbackPeer {
            addr: addr.to_string(),
            from_client: out_rx,
            to_client: in_tx,
        });
        Ok(Connection::new(out_tx, in_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_frames_flow_both_ways() {
        let factory = LoopbackFactory::new();
        let conn = factory.open("10.0.0.1:443").await.unwrap();
        let mut peer = factory.endpoints().pop().unwrap();

        conn.send(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(peer.from_client.recv().await.unwrap(), vec![1, 2, 3, 4]);

        peer.to_client.send(vec![9, 9]).unwrap();
        assert_eq!(conn.recv().await.unwrap(), vec![9, 9]);
    }
}
