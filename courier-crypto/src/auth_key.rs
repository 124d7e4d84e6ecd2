//! The 256-byte authorization key negotiated with a data center.

use crate::sha1;

/// A DC authorization key plus its pre-computed identifiers.
///
/// `key_id` is the low 64 bits of `SHA-1(key)` (bytes 12..20) and travels in
/// clear text in front of every encrypted message. `aux_hash` (bytes 0..8)
/// is only used while finishing the DH handshake.
#[derive(Clone)]
pub struct AuthKey {
    data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Wrap the raw 256-byte DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        let mut key_id = [0u8; 8];
        aux_hash.copy_from_slice(&digest[..8]);
        key_id.copy_from_slice(&digest[12..]);
        Self { data, aux_hash, key_id }
    }

    /// The raw key material.
    pub fn data(&self) -> &[u8; 256] {
        &self.data
    }

    /// The raw 256-byte representation, for persistence.
    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The 8-byte key identifier.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The key identifier as a little-endian integer.
    pub fn key_id_u64(&self) -> u64 {
        u64::from_le_bytes(self.key_id)
    }

    /// The new-nonce hash used to verify `dh_gen_ok` / `_retry` / `_fail`.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let digest = sha1!(new_nonce, &[number], &self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[4..]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={:#018x})", self.key_id_u64())
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}

impl Drop for AuthKey {
    fn drop(&mut self) {
        // key material must not linger after the DC object goes away
        self.data.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_low_64_of_sha1() {
        let key = AuthKey::from_bytes([0x42; 256]);
        let digest = sha1!(&[0x42u8; 256]);
        assert_eq!(key.key_id(), digest[12..20]);
        assert_eq!(key.key_id_u64(), u64::from_le_bytes(digest[12..20].try_into().unwrap()));
    }
}
