//! RSA encryption of the `p_q_inner_data` payload during the handshake.
//!
//! The layer this client speaks uses the original MTProto padding: the
//! 255-byte block is `SHA1(data) ‖ data ‖ random`, raised to the server
//! key's public exponent.

use num_bigint::BigUint;

use crate::sha1;

/// An RSA public key `(n, e)`.
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The low 64 bits of `SHA1(rsa_public_key n:string e:string)`, which is
    /// how the server refers to its keys in `resPQ`.
    pub fn fingerprint(&self) -> i64 {
        let mut buf = Vec::new();
        tl_bytes(&self.n.to_bytes_be(), &mut buf);
        tl_bytes(&self.e.to_bytes_be(), &mut buf);
        let digest = sha1!(&buf);
        i64::from_le_bytes(digest[12..20].try_into().unwrap())
    }
}

fn tl_bytes(data: &[u8], out: &mut Vec<u8>) {
    // TL string framing: 1-byte length for short strings, padded to 4 bytes
    if data.len() <= 253 {
        out.push(data.len() as u8);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
    }
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Encrypt `data` (≤ 235 bytes) under `key`.
///
/// `random_padding` supplies the filler bytes after `SHA1(data) ‖ data`;
/// callers pass fresh CSPRNG output.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_padding: &[u8]) -> Vec<u8> {
    assert!(data.len() + 20 <= 255, "inner data too large for one RSA block");

    let mut block = Vec::with_capacity(255);
    block.extend_from_slice(&sha1!(data));
    block.extend_from_slice(data);
    let fill = 255 - block.len();
    block.extend_from_slice(&random_padding[..fill]);

    let payload = BigUint::from_bytes_be(&block);
    let encrypted = payload.modpow(&key.e, &key.n);

    let mut out = encrypted.to_bytes_be();
    while out.len() < 256 {
        out.insert(0, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Toy 50-ish bit key for structural checks: n = p·q with
    // p = 1_000_003, q = 1_000_033.
    fn toy_key() -> Key {
        Key::new("1000036000099", "65537").unwrap()
    }

    #[test]
    fn output_is_always_256_bytes() {
        let key = toy_key();
        let padding = [0xabu8; 255];
        let out = encrypt_hashed(b"hello", &key, &padding);
        assert_eq!(out.len(), 256);
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = toy_key();
        assert_eq!(key.fingerprint(), toy_key().fingerprint());
    }
}
