//! A write-only buffer of little-endian 32-bit words.
//!
//! Composed payloads (secret-chat envelopes, journal replays, container
//! re-wraps) are built by appending typed values; the buffer stays aligned
//! to the 4-byte word the TL format is defined in. Each query owns its own
//! serializer — they are never shared.

/// Word-oriented write buffer.
#[derive(Clone, Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(words: usize) -> Self {
        Self { buf: Vec::with_capacity(words * 4) }
    }

    // ── typed appends ──────────────────────────────────────────────────────

    pub fn out_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a run of raw words.
    pub fn out_i32s(&mut self, vs: &[i32]) {
        for v in vs {
            self.out_i32(*v);
        }
    }

    /// Append a TL byte string (1- or 4-byte length header, zero-padded to
    /// a word boundary).
    pub fn out_bytes(&mut self, data: &[u8]) {
        let header_len = if data.len() <= 253 {
            self.buf.push(data.len() as u8);
            1
        } else {
            self.buf.push(0xfe);
            self.buf.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
            4
        };
        self.buf.extend_from_slice(data);
        let padding = (4 - (header_len + data.len()) % 4) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(padding));
    }

    pub fn out_string(&mut self, s: &str) {
        self.out_bytes(s.as_bytes());
    }

    /// Append a TL byte string of `n` cryptographically random bytes.
    pub fn out_random(&mut self, n: usize) {
        let mut rnd = vec![0u8; n];
        getrandom::getrandom(&mut rnd).expect("system rng unavailable");
        self.out_bytes(&rnd);
    }

    /// Append raw bytes without TL framing. `data.len()` must keep the
    /// buffer word-aligned.
    pub fn out_raw(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len() % 4, 0);
        self.buf.extend_from_slice(data);
    }

    // ── views ──────────────────────────────────────────────────────────────

    /// Byte count written so far. Always a multiple of 4.
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// Word count written so far.
    pub fn word_count(&self) -> usize {
        self.buf.len() / 4
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Iterate over the buffer as little-endian words.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ── tail surgery (used by the secret-chat encryptor) ───────────────────

    /// Detach and return everything from byte offset `pos` to the end.
    pub fn split_off(&mut self, pos: usize) -> Vec<u8> {
        self.buf.split_off(pos)
    }

    /// Read-only view of the bytes from `pos` to the end.
    pub fn tail(&self, pos: usize) -> &[u8] {
        &self.buf[pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_little_endian_words() {
        let mut s = Serializer::new();
        s.out_i32(1);
        s.out_i64(-1);
        assert_eq!(s.word_count(), 3);
        assert_eq!(s.as_bytes(), &[1, 0, 0, 0, 255, 255, 255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn strings_keep_word_alignment() {
        let mut s = Serializer::new();
        s.out_string("hi");
        assert_eq!(s.byte_len() % 4, 0);
        s.out_bytes(&[1, 2, 3, 4, 5]);
        assert_eq!(s.byte_len() % 4, 0);
        s.out_random(15);
        assert_eq!(s.byte_len() % 4, 0);
    }

    #[test]
    fn split_off_detaches_the_tail() {
        let mut s = Serializer::new();
        s.out_i32(0x11111111);
        s.out_i32(0x22222222);
        let tail = s.split_off(4);
        assert_eq!(tail, 0x22222222i32.to_le_bytes());
        assert_eq!(s.byte_len(), 4);
    }

    #[test]
    fn words_view_matches_bytes() {
        let mut s = Serializer::new();
        s.out_u32(0xdeadbeef);
        s.out_u32(0x01020304);
        let words: Vec<u32> = s.words().collect();
        assert_eq!(words, vec![0xdeadbeef, 0x01020304]);
    }
}
