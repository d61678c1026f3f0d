//! HMAC chain ratchet for forward-secure message key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: Old chain keys are overwritten when advancing
//! - Key Uniqueness: Each index produces a unique message key
//! - Determinism: Same chain key always produces same key sequence

use hmac::{Hmac, Mac};
use roomcrypt_core::RatchetError;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// Version byte of the exported session key format
const SESSION_KEY_VERSION: u8 = 1;

/// version (1) + index (4) + chain key (32)
const SESSION_KEY_LEN: usize = 37;

/// Maximum number of indices to skip in one step.
///
/// Bounds the work an attacker-chosen index can cause when decrypting.
pub const MAX_SKIP: u32 = 1 << 16;

/// A message key derived from the ratchet.
///
/// Used for a single message encryption/decryption, then discarded.
#[derive(Clone)]
pub struct MessageKey {
    /// The 32-byte symmetric key for XChaCha20-Poly1305
    key: [u8; 32],
    /// The ratchet index this key was derived at
    index: u32,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Ratchet index this key was derived at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Forward-secure chain ratchet.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key (forward secrecy)
///
/// Cloning is how a receiver keeps the state at its first known index while
/// deriving keys for later ones.
#[derive(Clone)]
pub struct ChainRatchet {
    /// Current chain key (32 bytes)
    chain_key: [u8; 32],
    /// Index of the next message key
    index: u32,
}

impl ChainRatchet {
    /// Create a ratchet at index 0 from a random seed.
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, index: 0 }
    }

    /// Index of the next message key.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Advance the ratchet and derive the message key for the current index.
    pub fn advance(&mut self) -> Result<MessageKey, RatchetError> {
        if self.index == u32::MAX {
            return Err(RatchetError::Internal("ratchet index exhausted".to_string()));
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let current = self.index;
        self.index += 1;

        Ok(MessageKey { key: message_key, index: current })
    }

    /// Advance to `target` and return its message key.
    ///
    /// Fails with `UnknownMessageIndex` if `target` is behind the ratchet.
    pub fn advance_to(&mut self, target: u32) -> Result<MessageKey, RatchetError> {
        self.skip_to(target)?;
        self.advance()
    }

    /// Advance without producing keys until the next index is `target`.
    pub fn skip_to(&mut self, target: u32) -> Result<(), RatchetError> {
        if target < self.index {
            return Err(RatchetError::UnknownMessageIndex { index: target });
        }
        if target - self.index > MAX_SKIP {
            return Err(RatchetError::BadCiphertext(format!(
                "index {target} is more than {MAX_SKIP} ahead of {}",
                self.index
            )));
        }

        while self.index < target {
            self.advance()?;
        }
        Ok(())
    }

    /// Export the ratchet state as a session key string.
    pub fn export_key(&self) -> String {
        let mut bytes = Zeroizing::new(Vec::with_capacity(SESSION_KEY_LEN));
        bytes.push(SESSION_KEY_VERSION);
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.chain_key);
        hex::encode(bytes.as_slice())
    }

    /// Rebuild a ratchet from [`Self::export_key`] output.
    pub fn import_key(session_key: &str) -> Result<Self, RatchetError> {
        let bytes = Zeroizing::new(
            hex::decode(session_key)
                .map_err(|e| RatchetError::InvalidSessionKey(format!("not hex: {e}")))?,
        );

        if bytes.len() != SESSION_KEY_LEN {
            return Err(RatchetError::InvalidSessionKey(format!(
                "expected {SESSION_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != SESSION_KEY_VERSION {
            return Err(RatchetError::InvalidSessionKey(format!("unknown version {}", bytes[0])));
        }

        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[1..5]);
        let mut chain_key = [0u8; 32];
        chain_key.copy_from_slice(&bytes[5..]);

        Ok(Self { chain_key, index: u32::from_be_bytes(index) })
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        key
    }
}

impl Drop for ChainRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn advance_produces_unique_keys() {
        let mut ratchet = ChainRatchet::new(&test_seed());

        let key0 = ratchet.advance().unwrap();
        let key1 = ratchet.advance().unwrap();

        assert_eq!((key0.index(), key1.index()), (0, 1));
        assert_ne!(key0.key(), key1.key(), "keys must be unique");
        assert_eq!(ratchet.index(), 2);
    }

    #[test]
    fn advance_to_matches_sequential_advance() {
        let mut sequential = ChainRatchet::new(&test_seed());
        for _ in 0..5 {
            sequential.advance().unwrap();
        }
        let key_sequential = sequential.advance().unwrap();

        let mut skipping = ChainRatchet::new(&test_seed());
        let key_skip = skipping.advance_to(5).unwrap();

        assert_eq!(key_sequential.key(), key_skip.key());
    }

    #[test]
    fn advance_to_rejects_past_index() {
        let mut ratchet = ChainRatchet::new(&test_seed());
        ratchet.advance_to(5).unwrap();

        assert!(matches!(
            ratchet.advance_to(3),
            Err(RatchetError::UnknownMessageIndex { index: 3 })
        ));
    }

    #[test]
    fn skip_bounded() {
        let mut ratchet = ChainRatchet::new(&test_seed());
        assert!(ratchet.skip_to(MAX_SKIP + 1).is_err());
        assert_eq!(ratchet.index(), 0);
    }

    #[test]
    fn exported_key_derives_same_later_keys() {
        let mut sender = ChainRatchet::new(&test_seed());
        sender.advance_to(2).unwrap();

        let mut receiver = ChainRatchet::import_key(&sender.export_key()).unwrap();
        assert_eq!(receiver.index(), 3);

        let sent = sender.advance().unwrap();
        let received = receiver.advance().unwrap();
        assert_eq!(sent.key(), received.key());
        assert_eq!(received.index(), 3);
    }

    #[test]
    fn malformed_session_keys_rejected() {
        assert!(matches!(
            ChainRatchet::import_key("zz"),
            Err(RatchetError::InvalidSessionKey(_))
        ));
        assert!(matches!(
            ChainRatchet::import_key("0100"),
            Err(RatchetError::InvalidSessionKey(_))
        ));

        let mut wrong_version = ChainRatchet::new(&test_seed()).export_key();
        wrong_version.replace_range(0..2, "07");
        assert!(ChainRatchet::import_key(&wrong_version).is_err());
    }
}
