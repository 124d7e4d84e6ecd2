//! Byte-stream transport seam and the abridged MTProto framing.
//!
//! The abridged framing is the smallest one: a single `0xef` byte when the
//! connection opens, then each packet is `[length/4 as 1 or 4 bytes] ‖
//! payload`.

/// A full-duplex transport delivering complete framed packets.
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send raw bytes to the remote.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next complete packet.
    fn recv(&mut self) -> Result<Vec<u8>, Self::Error>;
}

/// Encode the abridged length header for a `len`-byte payload.
///
/// `len` must be a multiple of 4.
pub fn abridged_header(len: usize) -> Vec<u8> {
    debug_assert_eq!(len % 4, 0);
    let words = len / 4;
    if words < 0x7f {
        vec![words as u8]
    } else {
        vec![
            0x7f,
            (words & 0xff) as u8,
            ((words >> 8) & 0xff) as u8,
            ((words >> 16) & 0xff) as u8,
        ]
    }
}

/// The `0xef` init byte the abridged framing starts with.
pub const ABRIDGED_INIT: u8 = 0xef;

/// Wraps a [`Transport`] and applies abridged framing on send.
pub struct AbridgedTransport<T: Transport> {
    inner: T,
    init_sent: bool,
}

impl<T: Transport> AbridgedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, init_sent: false }
    }

    pub fn send_message(&mut self, data: &[u8]) -> Result<(), T::Error> {
        if !self.init_sent {
            self.inner.send(&[ABRIDGED_INIT])?;
            self.init_sent = true;
        }
        self.inner.send(&abridged_header(data.len()))?;
        self.inner.send(data)
    }

    pub fn recv_message(&mut self) -> Result<Vec<u8>, T::Error> {
        self.inner.recv()
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemTransport {
        outbox: Vec<u8>,
    }

    impl Transport for MemTransport {
        type Error = std::io::Error;
        fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            self.outbox.extend_from_slice(data);
            Ok(())
        }
        fn recv(&mut self) -> Result<Vec<u8>, Self::Error> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn short_and_long_headers() {
        assert_eq!(abridged_header(4), vec![1]);
        assert_eq!(abridged_header(0x7e * 4), vec![0x7e]);
        let long = abridged_header(0x80 * 4);
        assert_eq!(long, vec![0x7f, 0x80, 0, 0]);
    }

    #[test]
    fn init_byte_sent_exactly_once() {
        let mut t = AbridgedTransport::new(MemTransport { outbox: Vec::new() });
        t.send_message(&[0u8; 4]).unwrap();
        assert_eq!(t.inner_mut().outbox[0], ABRIDGED_INIT);
        let first_len = t.inner_mut().outbox.len();
        t.send_message(&[0u8; 4]).unwrap();
        assert_ne!(t.inner_mut().outbox[first_len], ABRIDGED_INIT);
    }
}
