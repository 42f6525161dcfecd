//! # Cryptographic Plumbing for Meridian
//!
//! Thin, type-safe wrappers around audited primitives. Nothing in here is
//! novel cryptography, and that is the point:
//!
//! - **AES-256-GCM** for the per-call envelope. AEAD done right.
//! - **X25519 + BLAKE3** for sealing passwords past the relaying hop.
//!
//! If you're tempted to optimize these functions, please reconsider. Then
//! go read about timing attacks and come back when you've lost the urge.

pub mod envelope;
pub mod password;

pub use envelope::{open, seal, EncryptedEnvelope, EnvelopeError};
pub use password::{seal_password, unseal_password, SealError, SealedPassword};
