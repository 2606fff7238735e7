//! Blob sealing.
//!
//! Every blob handed to an uploader is `head ++ nonce ++ ciphertext`, where
//! `head` is the backend's decoy prefix (typically a tiny image), `nonce` is
//! a fresh 24-byte XChaCha20 nonce and `ciphertext` is the chunk sealed with
//! the upload's [`ShareKey`]. The authentication tag lets downloads detect a
//! truncated or tampered blob and refetch it.

use bytes::Bytes;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use scatter_types::ShareKey;

use crate::error::FormatError;

/// XChaCha20 nonce length.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Bytes added to a payload by [`seal`], not counting the head.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Total blob length for a payload of `payload_len` bytes behind a
/// `head_len`-byte head.
pub fn sealed_len(payload_len: usize, head_len: usize) -> usize {
    head_len + SEAL_OVERHEAD + payload_len
}

/// Seal `payload` with `key` and prepend `head`.
pub fn seal(head: &[u8], key: &ShareKey, payload: &[u8]) -> Result<Bytes, FormatError> {
    use rand::RngCore;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let aead = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = aead
        .encrypt(XNonce::from_slice(&nonce), payload)
        .map_err(|_| FormatError::Serialization("payload too large to seal".into()))?;

    let mut out = Vec::with_capacity(head.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(head);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(Bytes::from(out))
}

/// Strip the `head_size`-byte head from `blob` and unseal the payload.
pub fn unseal(blob: &[u8], head_size: usize, key: &ShareKey) -> Result<Bytes, FormatError> {
    let needed = head_size + SEAL_OVERHEAD;
    if blob.len() < needed {
        return Err(FormatError::BlobTooShort {
            needed,
            actual: blob.len(),
        });
    }

    let (nonce, ciphertext) = blob[head_size..].split_at(NONCE_LEN);
    let aead = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = aead
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| FormatError::Corrupt)?;
    Ok(Bytes::from(plaintext))
}
