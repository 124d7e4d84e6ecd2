//! The [`Deserializable`] trait, the zero-copy [`Cursor`], and impls for
//! the TL primitive types.

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Ways a TL decode can fail. Only these two — anything else is a bug in
/// the schema subset, not a runtime condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Buffer ended before the value was fully read.
    UnexpectedEof,
    /// Constructor id does not match any known variant of the target type.
    UnexpectedConstructor { id: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnexpectedConstructor { id } => {
                write!(f, "unexpected constructor id {id:#010x}")
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A read cursor over an in-memory byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Peek at the next constructor id without consuming it.
    pub fn peek_u32(&self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::UnexpectedEof);
        }
        Ok(u32::from_le_bytes(
            self.buf[self.pos..self.pos + 4].try_into().unwrap(),
        ))
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let b = self.buf.get(self.pos).copied().ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let end = self.pos + out.len();
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Consume everything left.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// The buffer handle the impls take.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Deserialize a value from TL binary form.
pub trait Deserializable: Sized {
    fn deserialize(buf: Buffer) -> Result<Self>;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        Self::deserialize(&mut cursor)
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x997275b5 => Ok(true),
            0xbc799737 => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl Deserializable for i32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }
}

impl Deserializable for u32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
}

impl Deserializable for i64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }
}

impl Deserializable for f64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }
}

impl Deserializable for [u8; 16] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 16];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

impl Deserializable for [u8; 32] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 32];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Bytes / String ──────────────────────────────────────────────────────────

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let first = buf.read_byte()?;
        let (len, header_len) = if first != 0xfe {
            (first as usize, 1)
        } else {
            let a = buf.read_byte()? as usize;
            let b = buf.read_byte()? as usize;
            let c = buf.read_byte()? as usize;
            (a | (b << 8) | (c << 16), 4)
        };

        let mut data = vec![0u8; len];
        buf.read_exact(&mut data)?;

        let padding = (4 - (header_len + len) % 4) % 4;
        for _ in 0..padding {
            buf.read_byte()?;
        }

        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let bytes = Vec::<u8>::deserialize(buf)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != 0x1cb5c415 {
            return Err(Error::UnexpectedConstructor { id });
        }
        let len = i32::deserialize(buf)? as usize;
        (0..len).map(|_| T::deserialize(buf)).collect()
    }
}

impl<T: Deserializable> Deserializable for crate::RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = i32::deserialize(buf)? as usize;
        let items = (0..len).map(|_| T::deserialize(buf)).collect::<Result<_>>()?;
        Ok(crate::RawVec(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Serializable;

    #[test]
    fn string_round_trip_both_headers() {
        for len in [0usize, 3, 4, 253, 254, 1000] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let wire = data.to_bytes();
            let back = Vec::<u8>::from_bytes(&wire).unwrap();
            assert_eq!(back, data, "len {len}");
        }
    }

    #[test]
    fn truncated_buffer_reports_eof() {
        let wire = vec![10u8, 1, 2]; // claims 10 bytes, has 2
        assert_eq!(Vec::<u8>::from_bytes(&wire), Err(Error::UnexpectedEof));
    }

    #[test]
    fn bool_rejects_other_constructors() {
        let wire = 0xdeadbeefu32.to_le_bytes();
        assert_eq!(
            bool::from_bytes(&wire),
            Err(Error::UnexpectedConstructor { id: 0xdeadbeef })
        );
    }
}
