//! Per-message AEAD.
//!
//! Wire layout of one ciphertext block:
//!
//! ```text
//! [ index: u32 BE ][ nonce: 24 bytes ][ XChaCha20-Poly1305 ciphertext + tag ]
//! ```
//!
//! The nonce is the index followed by 20 random bytes. The session id is the
//! associated data, so a block cannot be replayed into another session that
//! happens to share a key.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use roomcrypt_core::RatchetError;
use roomcrypt_proto::SessionId;

use crate::chain::MessageKey;

/// Random part of the nonce.
pub(crate) const NONCE_RANDOM_SIZE: usize = 20;

const INDEX_SIZE: usize = 4;
const NONCE_SIZE: usize = 24;
const HEADER_SIZE: usize = INDEX_SIZE + NONCE_SIZE;

/// Encrypt `plaintext` under `key`.
pub(crate) fn seal(
    key: &MessageKey,
    session_id: &SessionId,
    plaintext: &[u8],
    random: &[u8; NONCE_RANDOM_SIZE],
) -> Result<Vec<u8>, RatchetError> {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..INDEX_SIZE].copy_from_slice(&key.index().to_be_bytes());
    nonce[INDEX_SIZE..].copy_from_slice(random);

    let cipher = XChaCha20Poly1305::new(key.key().into());
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload {
            msg: plaintext,
            aad: session_id.as_str().as_bytes(),
        })
        .map_err(|_| RatchetError::Internal("AEAD encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + sealed.len());
    out.extend_from_slice(&key.index().to_be_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Ratchet index a block claims to be encrypted at.
pub(crate) fn message_index(block: &[u8]) -> Result<u32, RatchetError> {
    let Some(header) = block.get(..INDEX_SIZE) else {
        return Err(RatchetError::BadCiphertext(format!("block of {} bytes", block.len())));
    };
    let mut index = [0u8; INDEX_SIZE];
    index.copy_from_slice(header);
    Ok(u32::from_be_bytes(index))
}

/// Decrypt a block sealed by [`seal`].
pub(crate) fn open(
    key: &MessageKey,
    session_id: &SessionId,
    block: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    if block.len() < HEADER_SIZE {
        return Err(RatchetError::BadCiphertext(format!("block of {} bytes", block.len())));
    }

    let nonce = &block[INDEX_SIZE..HEADER_SIZE];
    if nonce[..INDEX_SIZE] != key.index().to_be_bytes() {
        return Err(RatchetError::BadCiphertext("nonce does not match index".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(key.key().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload {
            msg: &block[HEADER_SIZE..],
            aad: session_id.as_str().as_bytes(),
        })
        .map_err(|_| RatchetError::BadCiphertext("authentication failed".to_string()))
}
