//! # Principals & Long-Term Keying Material
//!
//! A principal is one of the three named actors in the platform: the user
//! client, the bank-facing server, and the database-facing server. Each is
//! provisioned out of band with long-term symmetric keying material (key
//! plus initialization vector), immutable for the process lifetime. The
//! key distribution center holds a directory of all of them; everyone else
//! holds only their own.
//!
//! Key bytes are never logged. If you add logging to this module, you will
//! be asked to leave.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{SESSION_IV_LENGTH, SESSION_KEY_LENGTH};
use crate::error::BankingError;

/// A named actor in the banking platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Principal {
    /// The client driving handshakes and business calls.
    User,
    /// The bank-facing RPC server; relays to the database server.
    Bank,
    /// The database-facing RPC server; owns the ledger.
    Database,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Principal::User => "user",
            Principal::Bank => "bank",
            Principal::Database => "database",
        };
        f.write_str(name)
    }
}

/// Symmetric keying material: a 256-bit key and the IV bound to it.
///
/// Used both for long-term per-principal keys (provisioned at startup) and
/// for the ephemeral session keys the KDC mints per handshake. The IV is
/// not a GCM nonce; every seal draws a fresh random nonce. The IV travels
/// with the key and is authenticated into every envelope, binding a
/// ciphertext to this exact keying material.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: [u8; SESSION_KEY_LENGTH],
    iv: [u8; SESSION_IV_LENGTH],
}

impl KeyMaterial {
    /// Wrap provisioned key bytes.
    pub fn new(key: [u8; SESSION_KEY_LENGTH], iv: [u8; SESSION_IV_LENGTH]) -> Self {
        KeyMaterial { key, iv }
    }

    /// Mint fresh random material from the OS CSPRNG. This is what the KDC
    /// calls once per handshake; the output must never be reused across
    /// calls, and `OsRng` guarantees that short of an OS-level catastrophe.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LENGTH];
        let mut iv = [0u8; SESSION_IV_LENGTH];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        KeyMaterial { key, iv }
    }

    /// The 256-bit key.
    pub fn key(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.key
    }

    /// The bound initialization vector.
    pub fn iv(&self) -> &[u8; SESSION_IV_LENGTH] {
        &self.iv
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material in debug output. Not even "partially."
        write!(f, "KeyMaterial(redacted)")
    }
}

/// The KDC's view of every principal's long-term symmetric key.
///
/// Populated from injected configuration at startup and immutable
/// afterwards. A lookup miss is a protocol violation, not a panic.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: HashMap<Principal, KeyMaterial>,
}

impl KeyDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a principal's long-term material. Last write wins; in
    /// practice each principal is inserted exactly once at startup.
    pub fn insert(&mut self, principal: Principal, material: KeyMaterial) {
        self.keys.insert(principal, material);
    }

    /// Look up a principal's long-term material.
    pub fn lookup(&self, principal: Principal) -> Result<&KeyMaterial, BankingError> {
        self.keys
            .get(&principal)
            .ok_or_else(|| BankingError::protocol(format!("unknown principal: {principal}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&Principal::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Principal::Bank).unwrap(), "\"bank\"");
        assert_eq!(
            serde_json::to_string(&Principal::Database).unwrap(),
            "\"database\""
        );
        let back: Principal = serde_json::from_str("\"database\"").unwrap();
        assert_eq!(back, Principal::Database);
    }

    #[test]
    fn generated_material_is_unique() {
        let a = KeyMaterial::generate();
        let b = KeyMaterial::generate();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn directory_rejects_unknown_principal() {
        let mut directory = KeyDirectory::new();
        directory.insert(Principal::User, KeyMaterial::generate());
        assert!(directory.lookup(Principal::User).is_ok());
        let err = directory.lookup(Principal::Database).unwrap_err();
        assert!(matches!(err, BankingError::Protocol(_)));
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let material = KeyMaterial::generate();
        let rendered = format!("{material:?}");
        assert_eq!(rendered, "KeyMaterial(redacted)");
        assert!(!rendered.contains(&hex::encode(material.key())));
    }
}
