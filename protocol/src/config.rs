//! # Protocol Configuration & Constants
//!
//! Every magic number in Meridian lives here. If you're hardcoding a
//! constant somewhere else, you're doing it wrong and you owe the team
//! coffee.

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The protocol version peers advertise to each other.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM for symmetric sealing. 256-bit keys, 96-bit nonces,
/// 128-bit authentication tags.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// Session (and long-term) symmetric key length in bytes.
pub const SESSION_KEY_LENGTH: usize = 32;

/// Session initialization vector length in bytes. The IV is provisioned or
/// negotiated alongside the key and bound into every envelope as additional
/// authenticated data, so an envelope sealed for one session cannot be
/// accepted under another session's keying material.
pub const SESSION_IV_LENGTH: usize = 16;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// X25519 static-ephemeral exchange seals passwords end-to-end past the
/// relaying bank hop.
pub const PASSWORD_SEAL_ALGORITHM: &str = "X25519+AES-256-GCM";

/// BLAKE3 `derive_key` context string for the password-sealing KDF.
/// Domain-separated so password-seal keys can never collide with any other
/// use of BLAKE3 in the protocol.
pub const PASSWORD_SEAL_CONTEXT: &str = "meridian-protocol v1 password seal key";

// ---------------------------------------------------------------------------
// Replay Protection
// ---------------------------------------------------------------------------

/// Sliding retention window for accepted freshness tokens, in milliseconds.
///
/// Tokens a full window behind the newest accepted token for an operation
/// kind are pruned from memory, and anything at or behind the pruning
/// horizon is rejected outright. Within the window the observable behavior
/// is exactly "no token is ever accepted twice".
pub const REPLAY_RETENTION_MS: i64 = 10 * 60 * 1_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_parameter_sizes() {
        assert_eq!(SESSION_KEY_LENGTH, 32);
        assert_eq!(SESSION_IV_LENGTH, 16);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
    }

    #[test]
    fn replay_window_is_positive() {
        assert!(REPLAY_RETENTION_MS > 0);
    }
}
