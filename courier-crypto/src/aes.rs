//! AES-256 in IGE mode, the block chaining MTProto uses for message bodies
//! and secret-chat attachments.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

/// Encrypt `buffer` in place with AES-256-IGE.
///
/// `buffer.len()` must be a multiple of 16. The 32-byte `iv` is split into
/// the previous-ciphertext half (`iv[..16]`) and previous-plaintext half
/// (`iv[16..]`).
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher: [u8; 16] = iv[..16].try_into().unwrap();
    let mut prev_plain: [u8; 16] = iv[16..].try_into().unwrap();

    for chunk in buffer.chunks_exact_mut(16) {
        let plain: [u8; 16] = chunk.try_into().unwrap();

        for (b, p) in chunk.iter_mut().zip(prev_cipher.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        for (b, p) in chunk.iter_mut().zip(prev_plain.iter()) {
            *b ^= p;
        }

        prev_cipher.copy_from_slice(chunk);
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place with AES-256-IGE.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher: [u8; 16] = iv[..16].try_into().unwrap();
    let mut prev_plain: [u8; 16] = iv[16..].try_into().unwrap();

    for chunk in buffer.chunks_exact_mut(16) {
        let ciphertext: [u8; 16] = chunk.try_into().unwrap();

        for (b, p) in chunk.iter_mut().zip(prev_plain.iter()) {
            *b ^= p;
        }
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        for (b, p) in chunk.iter_mut().zip(prev_cipher.iter()) {
            *b ^= p;
        }

        prev_plain.copy_from_slice(chunk);
        prev_cipher = ciphertext;
    }
}

/// Like [`ige_encrypt`], but writes the final chaining state back into
/// `iv` so the next call continues the stream. File transfers encrypt one
/// 512 KiB part at a time with this.
pub fn ige_encrypt_chained(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 32]) {
    if buffer.is_empty() {
        return;
    }
    let last_plain: [u8; 16] = buffer[buffer.len() - 16..].try_into().unwrap();
    ige_encrypt(buffer, key, iv);
    iv[..16].copy_from_slice(&buffer[buffer.len() - 16..]);
    iv[16..].copy_from_slice(&last_plain);
}

/// Decrypting counterpart of [`ige_encrypt_chained`].
pub fn ige_decrypt_chained(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 32]) {
    if buffer.is_empty() {
        return;
    }
    let last_cipher: [u8; 16] = buffer[buffer.len() - 16..].try_into().unwrap();
    ige_decrypt(buffer, key, iv);
    iv[..16].copy_from_slice(&last_cipher);
    iv[16..].copy_from_slice(&buffer[buffer.len() - 16..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_parts_equal_one_shot() {
        let key = [0x21u8; 32];
        let iv = [0x84u8; 32];
        let data: Vec<u8> = (0..160u32).map(|i| (i * 13) as u8).collect();

        let mut whole = data.clone();
        ige_encrypt(&mut whole, &key, &iv);

        let mut chained = data.clone();
        let mut running_iv = iv;
        for chunk in chained.chunks_mut(64) {
            ige_encrypt_chained(chunk, &key, &mut running_iv);
        }
        assert_eq!(chained, whole);

        let mut back = chained;
        let mut running_iv = iv;
        for chunk in back.chunks_mut(32) {
            ige_decrypt_chained(chunk, &key, &mut running_iv);
        }
        assert_eq!(back, data);
    }

    #[test]
    fn round_trip() {
        let key = [0x07u8; 32];
        let iv = [0x3au8; 32];
        let original: Vec<u8> = (0u8..64).collect();

        let mut buf = original.clone();
        ige_encrypt(&mut buf, &key, &iv);
        assert_ne!(buf, original);
        ige_decrypt(&mut buf, &key, &iv);
        assert_eq!(buf, original);
    }

    #[test]
    fn chaining_affects_later_blocks() {
        let key = [0x55u8; 32];
        let iv = [0u8; 32];

        let mut a = vec![0u8; 48];
        let mut b = vec![0u8; 48];
        b[0] ^= 1; // flip one bit in the first block

        ige_encrypt(&mut a, &key, &iv);
        ige_encrypt(&mut b, &key, &iv);

        // every block after the modified one must differ too
        assert_ne!(&a[16..32], &b[16..32]);
        assert_ne!(&a[32..48], &b[32..48]);
    }
}
