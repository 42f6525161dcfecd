//! # Key Distribution Center
//!
//! Steps 1 and 2 of the handshake. The KDC is the only party that knows
//! every principal's long-term key, which lets it introduce any two of
//! them: it mints a fresh session key and hands the initiator two sealed
//! copies of it, one the initiator can read and one (the "target ticket")
//! only the target can read, nested inside the first.
//!
//! ```text
//!   Initiator ──1── AuthenticateRequest {source, target, freshness} ──►  KDC
//!   Initiator ◄──2─ seal(source_key, TicketGrant {
//!                       target, freshness,
//!                       session_key, session_iv,
//!                       target_ticket: seal(target_key, Ticket{..}),
//!                   }) ─────────────────────────────────────────────────  KDC
//! ```
//!
//! The echoed freshness token lets the initiator confirm the grant answers
//! *this* request; the replay guard stops the same request from ever being
//! honored twice. Beyond that mutation the KDC is stateless: nothing about
//! the issued session survives the call.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::envelope::{self, EncryptedEnvelope};
use crate::error::BankingError;
use crate::principal::{KeyDirectory, KeyMaterial, Principal};
use crate::replay::{FreshnessToken, OperationKind, ReplayGuard};

/// Handshake step 1: what the initiator sends the KDC, in the clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    /// Who is asking.
    pub source: Principal,
    /// Who they want a session with.
    pub target: Principal,
    /// Single-use token for the `Authenticate` operation kind.
    pub freshness: FreshnessToken,
}

/// The session authorization only the target can read.
///
/// Sealed under the target's long-term key and relayed opaquely by the
/// initiator in step 3. Single-use: the target's responder consumes it to
/// build one session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// The principal the KDC authorized to use this session key.
    pub source: Principal,
    /// The principal this ticket is addressed to.
    pub target: Principal,
    /// Fresh symmetric session key.
    pub session_key: [u8; 32],
    /// IV bound to the session key.
    pub session_iv: [u8; 16],
}

/// Handshake step 2 payload, sealed under the *initiator's* long-term key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketGrant {
    /// Echo of the requested target; the initiator verifies it.
    pub target: Principal,
    /// Echo of the request's freshness token; the initiator verifies it.
    pub freshness: FreshnessToken,
    /// The session key, readable by the initiator.
    pub session_key: [u8; 32],
    /// The session IV, readable by the initiator.
    pub session_iv: [u8; 16],
    /// The same key sealed for the target; opaque to the initiator.
    pub target_ticket: Vec<u8>,
}

/// The key distribution / authentication server.
pub struct KeyDistributionCenter {
    directory: KeyDirectory,
    replay: ReplayGuard,
}

impl KeyDistributionCenter {
    /// Build a KDC over an injected, immutable key directory.
    pub fn new(directory: KeyDirectory) -> Self {
        KeyDistributionCenter {
            directory,
            replay: ReplayGuard::new(),
        }
    }

    /// Handle a step-1 request arriving as raw wire bytes.
    ///
    /// Malformed bytes are a [`BankingError::Protocol`]; everything else
    /// is [`authenticate`](Self::authenticate).
    pub fn authenticate_raw(&self, request: &[u8]) -> Result<EncryptedEnvelope, BankingError> {
        let request: AuthenticateRequest = serde_json::from_slice(request)
            .map_err(|e| BankingError::protocol(format!("malformed authenticate request: {e}")))?;
        self.authenticate(&request)
    }

    /// Issue a session ticket for `source` to talk to `target`.
    ///
    /// Principal lookups come first so that a request naming an unknown
    /// principal fails without burning its freshness token; the replay
    /// check is the only mutation this call makes.
    pub fn authenticate(&self, request: &AuthenticateRequest) -> Result<EncryptedEnvelope, BankingError> {
        let source_keys = self.directory.lookup(request.source)?;
        let target_keys = self.directory.lookup(request.target)?;

        self.replay
            .check_and_record(OperationKind::Authenticate, request.freshness)?;

        // Fresh random material per call, never reused across handshakes.
        let session = KeyMaterial::generate();
        debug!(source = %request.source, target = %request.target, "minted session material");

        let ticket = Ticket {
            source: request.source,
            target: request.target,
            session_key: *session.key(),
            session_iv: *session.iv(),
        };
        let target_ticket = envelope::seal(&ticket, target_keys)?.into_bytes();

        let grant = TicketGrant {
            target: request.target,
            freshness: request.freshness,
            session_key: *session.key(),
            session_iv: *session.iv(),
            target_ticket,
        };
        let sealed = envelope::seal(&grant, source_keys)?;

        info!(source = %request.source, target = %request.target, "issued session ticket");
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kdc_with_keys() -> (KeyDistributionCenter, KeyMaterial, KeyMaterial) {
        let user_keys = KeyMaterial::generate();
        let database_keys = KeyMaterial::generate();
        let mut directory = KeyDirectory::new();
        directory.insert(Principal::User, user_keys.clone());
        directory.insert(Principal::Database, database_keys.clone());
        (KeyDistributionCenter::new(directory), user_keys, database_keys)
    }

    fn request(freshness_ms: i64) -> AuthenticateRequest {
        AuthenticateRequest {
            source: Principal::User,
            target: Principal::Database,
            freshness: FreshnessToken::from_millis(freshness_ms),
        }
    }

    #[test]
    fn grant_opens_under_source_key_and_echoes_request() {
        let (kdc, user_keys, _) = kdc_with_keys();
        let req = request(1_000);
        let sealed = kdc.authenticate(&req).unwrap();

        let grant: TicketGrant = envelope::open(&sealed, &user_keys).unwrap();
        assert_eq!(grant.target, Principal::Database);
        assert_eq!(grant.freshness, req.freshness);
    }

    #[test]
    fn nested_ticket_opens_under_target_key_only() {
        let (kdc, user_keys, database_keys) = kdc_with_keys();
        let sealed = kdc.authenticate(&request(1_000)).unwrap();
        let grant: TicketGrant = envelope::open(&sealed, &user_keys).unwrap();

        let nested = EncryptedEnvelope::from_bytes(grant.target_ticket.clone());
        let ticket: Ticket = envelope::open(&nested, &database_keys).unwrap();
        assert_eq!(ticket.source, Principal::User);
        assert_eq!(ticket.target, Principal::Database);
        assert_eq!(ticket.session_key, grant.session_key);
        assert_eq!(ticket.session_iv, grant.session_iv);

        // The initiator's own key must not open the nested ticket.
        let as_user: Result<Ticket, _> = envelope::open(&nested, &user_keys);
        assert!(as_user.is_err());
    }

    #[test]
    fn session_material_differs_across_calls() {
        let (kdc, user_keys, _) = kdc_with_keys();
        let a = kdc.authenticate(&request(1_000)).unwrap();
        let b = kdc.authenticate(&request(2_000)).unwrap();
        let grant_a: TicketGrant = envelope::open(&a, &user_keys).unwrap();
        let grant_b: TicketGrant = envelope::open(&b, &user_keys).unwrap();
        assert_ne!(grant_a.session_key, grant_b.session_key);
        assert_ne!(grant_a.session_iv, grant_b.session_iv);
    }

    #[test]
    fn replayed_request_rejected() {
        let (kdc, _, _) = kdc_with_keys();
        assert!(kdc.authenticate(&request(1_000)).is_ok());
        let err = kdc.authenticate(&request(1_000)).unwrap_err();
        assert!(matches!(err, BankingError::Replay { .. }));
    }

    #[test]
    fn unknown_principal_rejected_without_burning_the_token() {
        let mut directory = KeyDirectory::new();
        directory.insert(Principal::User, KeyMaterial::generate());
        let kdc = KeyDistributionCenter::new(directory);

        let req = request(1_000);
        let err = kdc.authenticate(&req).unwrap_err();
        assert!(matches!(err, BankingError::Protocol(_)));

        // The failed call made no mutation: the same freshness token is
        // still accepted once the request names known principals.
        let valid = AuthenticateRequest {
            source: Principal::User,
            target: Principal::User,
            freshness: req.freshness,
        };
        assert!(kdc.authenticate(&valid).is_ok());
    }

    #[test]
    fn malformed_wire_bytes_are_a_protocol_error() {
        let (kdc, _, _) = kdc_with_keys();
        let err = kdc.authenticate_raw(b"{not json").unwrap_err();
        assert!(matches!(err, BankingError::Protocol(_)));
    }
}
