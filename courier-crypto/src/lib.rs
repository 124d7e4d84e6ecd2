//! Cryptographic primitives for the courier MTProto client.
//!
//! Provides:
//! - AES-256-IGE
//! - SHA-1 / SHA-256 macros
//! - Pollard-rho PQ factorization
//! - DH parameter validation (incl. Miller-Rabin primality)
//! - RSA encryption of the handshake payload
//! - `AuthKey` and the MTProto v1 message key schedule
//! - DH nonce→key derivation for the encrypted handshake answer

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod deque_buffer;
pub mod dh;
mod factorize;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use deque_buffer::DequeBuffer;
pub use factorize::factorize;

// ─── MTProto v1 message encryption ───────────────────────────────────────────

/// Errors from [`decrypt_message`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in front of the ciphertext is not ours.
    AuthKeyMismatch,
    /// The `msg_key` does not match the decrypted plaintext.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// Direction of a message, which selects the key-schedule offset `x`:
/// 0 from client, 8 from server. Secret-chat payloads use [`Side::Client`]
/// in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// The 128-bit message key: `SHA1(plaintext)[4..20]`, computed over the
/// plaintext *before* padding.
pub fn calc_msg_key(plaintext: &[u8]) -> [u8; 16] {
    let digest = sha1!(plaintext);
    digest[4..20].try_into().unwrap()
}

/// Derive the AES key and IV from `(key, msg_key)` with the v1 four-SHA1
/// schedule.
pub fn calc_key(key: &[u8; 256], msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    let a = sha1!(msg_key, &key[x..x + 32]);
    let b = sha1!(&key[32 + x..48 + x], msg_key, &key[48 + x..64 + x]);
    let c = sha1!(&key[64 + x..96 + x], msg_key);
    let d = sha1!(msg_key, &key[96 + x..128 + x]);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&a[..8]);
    aes_key[8..20].copy_from_slice(&b[8..20]);
    aes_key[20..].copy_from_slice(&c[4..16]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..12].copy_from_slice(&a[8..20]);
    aes_iv[12..20].copy_from_slice(&b[..8]);
    aes_iv[20..24].copy_from_slice(&c[16..20]);
    aes_iv[24..].copy_from_slice(&d[..8]);

    (aes_key, aes_iv)
}

fn padding_for(len: usize) -> usize {
    (16 - len % 16) % 16
}

/// Encrypt an outbound message in place.
///
/// `buffer` holds the inner plaintext (`salt ‖ session_id ‖ msg_id ‖ seq_no
/// ‖ len ‖ body`). After the call it holds `auth_key_id ‖ msg_key ‖
/// ciphertext`, where the ciphertext covers the plaintext plus 0–15 random
/// pad bytes.
pub fn encrypt_message(buffer: &mut DequeBuffer, auth_key: &AuthKey) {
    let msg_key = calc_msg_key(buffer.as_ref());

    let pad = padding_for(buffer.len());
    if pad > 0 {
        let mut rnd = [0u8; 16];
        getrandom::getrandom(&mut rnd).expect("system rng unavailable");
        buffer.extend(rnd.iter().take(pad).copied());
    }

    let (key, iv) = calc_key(auth_key.data(), &msg_key, Side::Client);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id());
}

/// Decrypt an inbound frame in place and return the plaintext (still
/// containing any server padding) together with the frame's `msg_key`.
///
/// The caller must confirm the message key against the declared inner
/// length with [`verify_msg_key`] once it has parsed the header.
pub fn decrypt_message<'a>(
    frame: &'a mut [u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<([u8; 16], &'a mut [u8]), DecryptError> {
    if frame.len() < 24 || (frame.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if frame[..8] != auth_key.key_id() {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let msg_key: [u8; 16] = frame[8..24].try_into().unwrap();

    let (key, iv) = calc_key(auth_key.data(), &msg_key, side);
    aes::ige_decrypt(&mut frame[24..], &key, &iv);

    Ok((msg_key, &mut frame[24..]))
}

/// Check that `msg_key` matches the plaintext prefix the inner header
/// declared. A mismatch means tampering or a key disagreement.
pub fn verify_msg_key(plain_prefix: &[u8], msg_key: &[u8; 16]) -> Result<(), DecryptError> {
    if &calc_msg_key(plain_prefix) == msg_key {
        Ok(())
    } else {
        Err(DecryptError::MessageKeyMismatch)
    }
}

/// Derive `(key, iv)` from the handshake nonces, for decrypting
/// `server_DH_params_ok.encrypted_answer`.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AuthKey {
        let mut data = [0u8; 256];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        AuthKey::from_bytes(data)
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let auth_key = test_key();
        let plain: Vec<u8> = (0u8..100).collect();

        let mut buf = DequeBuffer::with_capacity(plain.len(), 32);
        buf.extend(plain.iter().copied());
        encrypt_message(&mut buf, &auth_key);

        let mut wire = buf.as_ref().to_vec();
        assert_eq!(&wire[..8], &auth_key.key_id());

        // Decrypting as the sender requires the sender-side schedule.
        let (msg_key, recovered) =
            decrypt_message(&mut wire, &auth_key, Side::Client).unwrap();
        assert_eq!(&recovered[..plain.len()], plain.as_slice());
        verify_msg_key(&recovered[..plain.len()], &msg_key).unwrap();
    }

    #[test]
    fn ciphertext_is_block_aligned() {
        let auth_key = test_key();
        for len in [1usize, 15, 16, 17, 100] {
            let mut buf = DequeBuffer::with_capacity(len, 32);
            buf.extend(std::iter::repeat(0x5a).take(len));
            encrypt_message(&mut buf, &auth_key);
            assert_eq!((buf.len() - 24) % 16, 0, "len {len}");
        }
    }

    #[test]
    fn wrong_key_id_is_rejected() {
        let auth_key = test_key();
        let other = AuthKey::from_bytes([9u8; 256]);

        let mut buf = DequeBuffer::with_capacity(32, 32);
        buf.extend(std::iter::repeat(1u8).take(32));
        encrypt_message(&mut buf, &auth_key);

        let mut wire = buf.as_ref().to_vec();
        assert_eq!(
            decrypt_message(&mut wire, &other, Side::Client).unwrap_err(),
            DecryptError::AuthKeyMismatch
        );
    }

    #[test]
    fn tampering_breaks_the_message_key() {
        let auth_key = test_key();
        let plain = vec![7u8; 48];

        let mut buf = DequeBuffer::with_capacity(plain.len(), 32);
        buf.extend(plain.iter().copied());
        encrypt_message(&mut buf, &auth_key);

        let mut wire = buf.as_ref().to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let (msg_key, recovered) =
            decrypt_message(&mut wire, &auth_key, Side::Client).unwrap();
        assert_eq!(
            verify_msg_key(&recovered[..plain.len()], &msg_key),
            Err(DecryptError::MessageKeyMismatch)
        );
    }

    #[test]
    fn client_and_server_schedules_differ() {
        let key = test_key();
        let msg_key = [0x11u8; 16];
        let client = calc_key(key.data(), &msg_key, Side::Client);
        let server = calc_key(key.data(), &msg_key, Side::Server);
        assert_ne!(client, server);
    }
}
