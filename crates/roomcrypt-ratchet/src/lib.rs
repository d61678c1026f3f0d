//! Symmetric group ratchet.
//!
//! A [`RatchetEngine`](roomcrypt_core::RatchetEngine) built from the same
//! primitives as a sender-key scheme: an HMAC chain produces one message key
//! per index, and each message is sealed with XChaCha20-Poly1305.
//!
//! # Key Lifecycle
//!
//! ```text
//! Random seed (per outbound session)
//!        │
//!        ▼
//! Chain key at index i ── HMAC("chain") ──► chain key at index i+1
//!        │
//!        ▼ HMAC("message")
//! Message key i
//!        │
//!        ▼
//! AEAD Encryption → index ‖ nonce ‖ ciphertext
//! ```
//!
//! An exported session key is the chain key at some index together with
//! that index. A holder can derive every later message key but none before
//! it, which is what lets a receiver's first known index only move backwards
//! when a better key arrives.
//!
//! # Security
//!
//! - Chain keys and message keys are zeroized when dropped.
//! - The session id is bound into every ciphertext as associated data.
//! - A failed authentication tag rejects the message.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod chain;
mod cipher;
mod engine;

pub use chain::{ChainRatchet, MAX_SKIP, MessageKey};
pub use engine::SymmetricRatchetEngine;
