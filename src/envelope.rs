//! Decrypt/decompress envelope wrapping downloaded model files.
//!
//! Layout: `[ IV (16 B) | AES-256 key (32 B) | AES-CBC ciphertext ]`.
//! The plaintext starts with the little-endian decoded size followed by a
//! zstd payload.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::error::{Error, Result};

pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const HEADER_LEN: usize = IV_LEN + KEY_LEN;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Decrypt the AES-CBC body and decompress it to exactly the declared size.
pub fn decrypt_and_decode(file_contents: &[u8]) -> Result<Vec<u8>> {
    if file_contents.len() <= HEADER_LEN {
        return Err(Error::Envelope(format!(
            "payload is {} bytes, shorter than the {HEADER_LEN}-byte header",
            file_contents.len()
        )));
    }

    let iv = &file_contents[..IV_LEN];
    let key = &file_contents[IV_LEN..HEADER_LEN];
    let body = &file_contents[HEADER_LEN..];

    let decrypted = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|err| Error::Envelope(format!("invalid key material: {err}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| Error::Envelope("decryption failed: bad padding or key".to_string()))?;

    let Some((size_prefix, compressed)) = decrypted.split_first_chunk::<4>() else {
        return Err(Error::Envelope(
            "decrypted body is missing its size prefix".to_string(),
        ));
    };
    let decoded_size = u32::from_le_bytes(*size_prefix) as usize;

    let decoded = zstd::bulk::decompress(compressed, decoded_size)
        .map_err(|err| Error::Envelope(format!("zstd decompression failed: {err}")))?;

    if decoded.len() != decoded_size {
        return Err(Error::Envelope(format!(
            "decompressed {} bytes, header declared {decoded_size}",
            decoded.len()
        )));
    }

    tracing::debug!(decoded_size, "decrypted and decoded model payload");
    Ok(decoded)
}
