//! # Password Sealing
//!
//! Credentials take one extra hop than the rest of a business payload: the
//! user sends them through the bank-facing server, which relays to the
//! database-facing server. The bank must be able to route the message but
//! must never see the plaintext password, so the password field alone is
//! sealed asymmetrically for the database.
//!
//! The construction is a static-ephemeral X25519 exchange: the sender
//! mints an ephemeral keypair, computes DH against the recipient's static
//! public key, derives an AES-256-GCM key via BLAKE3's `derive_key` mode,
//! and seals the password under it. The ephemeral public key ships next to
//! the ciphertext and doubles as AAD. Only the holder of the static secret
//! can recompute the shared point and open the seal.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::config::{AES_NONCE_LENGTH, AES_TAG_LENGTH, PASSWORD_SEAL_CONTEXT, SESSION_KEY_LENGTH};
use crate::error::BankingError;

/// Errors from the asymmetric password seal.
#[derive(Debug, Error)]
pub enum SealError {
    /// The cipher refused to seal. Practically unreachable.
    #[error("password sealing failed")]
    SealFailed,

    /// Wrong private key, or the sealed bytes were modified in transit.
    #[error("password unsealing failed: wrong key or modified ciphertext")]
    UnsealFailed,

    /// The sealed blob is too short to carry a nonce and tag.
    #[error("sealed password truncated")]
    Truncated,
}

impl From<SealError> for BankingError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::UnsealFailed | SealError::Truncated => BankingError::Tampered(err.to_string()),
            SealError::SealFailed => BankingError::Protocol(err.to_string()),
        }
    }
}

/// A credential sealed for exactly one recipient.
///
/// Intermediate hops relay this blob untouched; only the holder of the
/// recipient's static X25519 secret can recover the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPassword {
    /// The sender's single-use X25519 public key.
    pub ephemeral_pubkey: [u8; 32],
    /// `nonce || ciphertext || tag` under the derived key.
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for SealedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The ciphertext is already opaque, but there is no reason to dump
        // it into logs either.
        write!(f, "SealedPassword({} bytes)", self.ciphertext.len())
    }
}

/// Seal a password for the holder of `recipient`'s static secret.
pub fn seal_password(password: &[u8], recipient: &PublicKey) -> Result<SealedPassword, SealError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = derive_seal_key(shared.as_bytes(), &ephemeral_pub.to_bytes(), &recipient.to_bytes());

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SealError::SealFailed)?;
    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: password,
                aad: ephemeral_pub.as_bytes(),
            },
        )
        .map_err(|_| SealError::SealFailed)?;

    let mut ciphertext = Vec::with_capacity(AES_NONCE_LENGTH + sealed.len());
    ciphertext.extend_from_slice(&nonce_bytes);
    ciphertext.extend_from_slice(&sealed);

    Ok(SealedPassword {
        ephemeral_pubkey: ephemeral_pub.to_bytes(),
        ciphertext,
    })
}

/// Unseal a password with the recipient's static secret.
pub fn unseal_password(sealed: &SealedPassword, recipient: &StaticSecret) -> Result<Vec<u8>, SealError> {
    if sealed.ciphertext.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(SealError::Truncated);
    }
    let ephemeral_pub = PublicKey::from(sealed.ephemeral_pubkey);
    let shared = recipient.diffie_hellman(&ephemeral_pub);
    let recipient_pub = PublicKey::from(recipient);
    let key = derive_seal_key(
        shared.as_bytes(),
        &sealed.ephemeral_pubkey,
        &recipient_pub.to_bytes(),
    );

    let (nonce_bytes, body) = sealed.ciphertext.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SealError::UnsealFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: body,
                aad: &sealed.ephemeral_pubkey,
            },
        )
        .map_err(|_| SealError::UnsealFailed)
}

/// Derive the one-shot AES key for a password seal.
///
/// Both public keys go into the derivation so the key is bound to this
/// exact sender/recipient pairing. BLAKE3's `derive_key` mode gives us
/// domain separation from every other hash use in the protocol for free.
fn derive_seal_key(
    shared_secret: &[u8; 32],
    ephemeral_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> [u8; SESSION_KEY_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_SEAL_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(ephemeral_pub);
    hasher.update(recipient_pub);

    let mut key = [0u8; SESSION_KEY_LENGTH];
    hasher.finalize_xof().fill(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let (secret, public) = recipient();
        let sealed = seal_password(b"hunter2", &public).unwrap();
        let recovered = unseal_password(&sealed, &secret).unwrap();
        assert_eq!(recovered, b"hunter2");
    }

    #[test]
    fn wrong_recipient_cannot_unseal() {
        let (_, public) = recipient();
        let (other_secret, _) = recipient();
        let sealed = seal_password(b"hunter2", &public).unwrap();
        assert!(matches!(
            unseal_password(&sealed, &other_secret),
            Err(SealError::UnsealFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let (secret, public) = recipient();
        let mut sealed = seal_password(b"hunter2", &public).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;
        assert!(matches!(
            unseal_password(&sealed, &secret),
            Err(SealError::UnsealFailed)
        ));
    }

    #[test]
    fn swapped_ephemeral_key_rejected() {
        // Replacing the ephemeral key breaks both the DH derivation and
        // the AAD binding; either way the tag cannot verify.
        let (secret, public) = recipient();
        let mut sealed = seal_password(b"hunter2", &public).unwrap();
        sealed.ephemeral_pubkey[0] ^= 0xFF;
        assert!(unseal_password(&sealed, &secret).is_err());
    }

    #[test]
    fn two_seals_of_same_password_differ() {
        let (_, public) = recipient();
        let a = seal_password(b"hunter2", &public).unwrap();
        let b = seal_password(b"hunter2", &public).unwrap();
        assert_ne!(a.ephemeral_pubkey, b.ephemeral_pubkey);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn truncated_blob_rejected() {
        let (secret, _) = recipient();
        let sealed = SealedPassword {
            ephemeral_pubkey: [0u8; 32],
            ciphertext: vec![0u8; 8],
        };
        assert!(matches!(
            unseal_password(&sealed, &secret),
            Err(SealError::Truncated)
        ));
    }
}
