//! # Cryptographic Envelope
//!
//! The per-call protection every Meridian RPC rides on after a handshake:
//! serialize the payload, seal it with AES-256-GCM under the session key,
//! and bind the session IV in as additional authenticated data.
//!
//! AES-GCM is an AEAD cipher, so encryption and the tamper check are one
//! construction: `open` verifies the tag before a single byte of
//! plaintext is released, and any single-bit corruption of the ciphertext
//! fails that check. There is no separate MAC to forget to verify.
//!
//! ## Nonce management
//!
//! GCM is notoriously unforgiving about nonce reuse. Every seal draws a
//! fresh random 96-bit nonce from the OS CSPRNG and prefixes it to the
//! ciphertext, so the wire format is `nonce || ciphertext || tag` in a
//! single buffer. The session IV never serves as a nonce; it is AAD,
//! binding each envelope to the exact keying material it was sealed under.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::{AES_NONCE_LENGTH, AES_TAG_LENGTH};
use crate::error::BankingError;
use crate::principal::KeyMaterial;

/// Errors from sealing and opening envelopes.
///
/// We intentionally keep the integrity variant vague. The difference
/// between "wrong key" and "corrupted ciphertext" is none of an
/// attacker's business.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The payload could not be serialized before sealing.
    #[error("payload serialization failed: {0}")]
    Serialize(String),

    /// The cipher refused to seal. Practically unreachable with a valid key.
    #[error("sealing failed")]
    SealFailed,

    /// The envelope is too short to even carry a nonce and tag.
    #[error("envelope truncated: shorter than nonce plus authentication tag")]
    Truncated,

    /// Tag verification failed: wrong key, wrong IV, or modified bytes.
    #[error("integrity check failed: wrong key or modified ciphertext")]
    IntegrityFailure,

    /// The authenticated plaintext did not match the expected shape.
    #[error("opened payload has unexpected shape: {0}")]
    Deserialize(String),
}

impl From<EnvelopeError> for BankingError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Truncated | EnvelopeError::IntegrityFailure => {
                BankingError::Tampered(err.to_string())
            }
            other => BankingError::Protocol(other.to_string()),
        }
    }
}

/// The sealed wire representation of one protocol message.
///
/// Opaque bytes to everyone except a holder of the matching
/// [`KeyMaterial`]. The layout is `nonce || ciphertext || tag` as produced
/// by [`seal`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Wrap bytes received from the wire.
    pub fn from_bytes(ciphertext: Vec<u8>) -> Self {
        EncryptedEnvelope { ciphertext }
    }

    /// The sealed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Unwrap into the sealed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.ciphertext
    }
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = hex::encode(&self.ciphertext[..self.ciphertext.len().min(8)]);
        write!(
            f,
            "EncryptedEnvelope({} bytes, {preview}..)",
            self.ciphertext.len()
        )
    }
}

/// Serialize and seal a payload under the given keying material.
pub fn seal<T: Serialize>(payload: &T, keys: &KeyMaterial) -> Result<EncryptedEnvelope, EnvelopeError> {
    let plaintext =
        serde_json::to_vec(payload).map_err(|e| EnvelopeError::Serialize(e.to_string()))?;
    Ok(EncryptedEnvelope {
        ciphertext: seal_bytes(&plaintext, keys)?,
    })
}

/// Verify, decrypt, and deserialize an envelope.
///
/// The authentication tag is checked first; on failure this returns
/// [`EnvelopeError::IntegrityFailure`] and no plaintext is ever produced.
pub fn open<T: DeserializeOwned>(
    envelope: &EncryptedEnvelope,
    keys: &KeyMaterial,
) -> Result<T, EnvelopeError> {
    let plaintext = open_bytes(&envelope.ciphertext, keys)?;
    serde_json::from_slice(&plaintext).map_err(|e| EnvelopeError::Deserialize(e.to_string()))
}

/// Seal raw bytes. Returns `nonce || ciphertext || tag`.
pub fn seal_bytes(plaintext: &[u8], keys: &KeyMaterial) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = Aes256Gcm::new_from_slice(keys.key()).map_err(|_| EnvelopeError::SealFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: keys.iv(),
            },
        )
        .map_err(|_| EnvelopeError::SealFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open raw `nonce || ciphertext || tag` bytes.
pub fn open_bytes(data: &[u8], keys: &KeyMaterial) -> Result<Vec<u8>, EnvelopeError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EnvelopeError::Truncated);
    }
    let (nonce_bytes, sealed) = data.split_at(AES_NONCE_LENGTH);
    let cipher =
        Aes256Gcm::new_from_slice(keys.key()).map_err(|_| EnvelopeError::IntegrityFailure)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: sealed,
                aad: keys.iv(),
            },
        )
        .map_err(|_| EnvelopeError::IntegrityFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        account: String,
        amount_cents: i64,
    }

    fn probe() -> Probe {
        Probe {
            account: "alice".into(),
            amount_cents: 12_345,
        }
    }

    #[test]
    fn roundtrip_same_key_and_iv() {
        let keys = KeyMaterial::generate();
        let sealed = seal(&probe(), &keys).unwrap();
        let recovered: Probe = open(&sealed, &keys).unwrap();
        assert_eq!(recovered, probe());
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let keys = KeyMaterial::generate();
        let sealed = seal(&probe(), &keys).unwrap();
        let bytes = sealed.as_bytes().to_vec();

        for byte_index in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte_index] ^= 1 << bit;
                let result: Result<Probe, _> =
                    open(&EncryptedEnvelope::from_bytes(corrupted), &keys);
                assert!(
                    matches!(result, Err(EnvelopeError::IntegrityFailure)),
                    "flip of byte {byte_index} bit {bit} was not detected"
                );
            }
        }
    }

    #[test]
    fn wrong_key_fails_integrity() {
        let keys = KeyMaterial::generate();
        let other = KeyMaterial::generate();
        let sealed = seal(&probe(), &keys).unwrap();
        let result: Result<Probe, _> = open(&sealed, &other);
        assert!(matches!(result, Err(EnvelopeError::IntegrityFailure)));
    }

    #[test]
    fn wrong_iv_fails_integrity() {
        // Same key, different bound IV: the AAD no longer matches.
        let keys = KeyMaterial::generate();
        let rebound = KeyMaterial::new(*keys.key(), [0x5A; 16]);
        let sealed = seal(&probe(), &keys).unwrap();
        let result: Result<Probe, _> = open(&sealed, &rebound);
        assert!(matches!(result, Err(EnvelopeError::IntegrityFailure)));
    }

    #[test]
    fn truncated_envelope_rejected() {
        let keys = KeyMaterial::generate();
        let result = open_bytes(&[0u8; 4], &keys);
        assert!(matches!(result, Err(EnvelopeError::Truncated)));
    }

    #[test]
    fn seals_are_nondeterministic() {
        // Fresh random nonce per seal: identical payloads must not produce
        // identical envelopes.
        let keys = KeyMaterial::generate();
        let a = seal(&probe(), &keys).unwrap();
        let b = seal(&probe(), &keys).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn integrity_failure_converts_to_tampered() {
        let err: BankingError = EnvelopeError::IntegrityFailure.into();
        assert!(matches!(err, BankingError::Tampered(_)));
        let err: BankingError = EnvelopeError::Deserialize("x".into()).into();
        assert!(matches!(err, BankingError::Protocol(_)));
    }
}
