//! # Session Initiator
//!
//! The client half of the handshake, written as a typestate ladder so the
//! five steps can only be driven in order:
//!
//! ```text
//!   SessionInitiator::begin ──► PendingHandshake      (step 1 sent)
//!   PendingHandshake::accept_grant ──► GrantedHandshake (step 2 verified)
//!   GrantedHandshake::answer_challenge ──► EstablishedSession (steps 3-5)
//! ```
//!
//! Each transition consumes `self`, so a grant can never be accepted
//! twice and a challenge can never be answered for a handshake that was
//! not granted. [`SessionInitiator::run`] drives the whole ladder against
//! a pair of transport traits for callers that do not need to interleave.

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::envelope::{self, EncryptedEnvelope};
use crate::error::BankingError;
use crate::kdc::{AuthenticateRequest, TicketGrant};
use crate::principal::{KeyMaterial, Principal};
use crate::replay::FreshnessToken;
use crate::session::responder::{NonceChallenge, NonceReply, PresentTicketRequest, StillAliveRequest};

/// The KDC-facing transport: step 1 in, sealed step 2 out.
pub trait AuthenticationApi {
    /// Submit a serialized [`AuthenticateRequest`], receive the sealed grant.
    fn authenticate(&self, request: &[u8]) -> Result<EncryptedEnvelope, BankingError>;
}

/// The responder-facing transport: steps 3 through 5.
pub trait HandshakeApi {
    /// Step 3: relay the target ticket, receive the sealed challenge.
    fn present_ticket(&self, request: &PresentTicketRequest) -> Result<EncryptedEnvelope, BankingError>;

    /// Step 5: submit the sealed liveness proof.
    fn still_alive(&self, request: &StillAliveRequest) -> Result<(), BankingError>;
}

/// A completed handshake: identifier plus the agreed keying material.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    session_id: String,
    keys: KeyMaterial,
    peer: Principal,
}

impl EstablishedSession {
    /// The identifier both sides track this session under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The session keying material.
    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// The authenticated peer.
    pub fn peer(&self) -> Principal {
        self.peer
    }
}

/// Builder for new sessions on behalf of one principal.
pub struct SessionInitiator {
    identity: Principal,
    long_term: KeyMaterial,
}

impl SessionInitiator {
    pub fn new(identity: Principal, long_term: KeyMaterial) -> Self {
        SessionInitiator { identity, long_term }
    }

    /// Start a handshake toward `target`: mints the step-1 request and
    /// remembers what must be echoed back.
    pub fn begin(&self, target: Principal) -> PendingHandshake {
        let freshness = FreshnessToken::now();
        debug!(source = %self.identity, target = %target, "starting handshake");
        PendingHandshake {
            target,
            freshness,
            request: AuthenticateRequest {
                source: self.identity,
                target,
                freshness,
            },
        }
    }

    /// Drive all five steps against live transports.
    pub fn run<A, H>(&self, target: Principal, kdc: &A, responder: &H) -> Result<EstablishedSession, BankingError>
    where
        A: AuthenticationApi,
        H: HandshakeApi,
    {
        let pending = self.begin(target);
        let wire = serialize_request(pending.request())?;
        let sealed_grant = kdc.authenticate(&wire)?;

        let (granted, present) = pending.accept_grant(&self.long_term, &sealed_grant)?;
        let sealed_challenge = responder.present_ticket(&present)?;

        let (session, proof) = granted.answer_challenge(&sealed_challenge)?;
        responder.still_alive(&proof)?;

        info!(session = %session.session_id(), peer = %target, "handshake complete");
        Ok(session)
    }
}

fn serialize_request<T: Serialize>(request: &T) -> Result<Vec<u8>, BankingError> {
    serde_json::to_vec(request)
        .map_err(|e| BankingError::protocol(format!("request serialization failed: {e}")))
}

/// Step 1 sent, waiting on the KDC's grant.
pub struct PendingHandshake {
    target: Principal,
    freshness: FreshnessToken,
    request: AuthenticateRequest,
}

impl PendingHandshake {
    /// The step-1 request to put on the wire.
    pub fn request(&self) -> &AuthenticateRequest {
        &self.request
    }

    /// Step 2: open and verify the KDC's grant.
    ///
    /// The grant must name the target this handshake was started toward
    /// and echo the exact freshness token from step 1; any mismatch means
    /// the grant was substituted or replayed and is treated as tampering.
    /// On success, yields the step-3 request to relay to the responder.
    pub fn accept_grant(
        self,
        long_term: &KeyMaterial,
        sealed: &EncryptedEnvelope,
    ) -> Result<(GrantedHandshake, PresentTicketRequest), BankingError> {
        let grant: TicketGrant = envelope::open(sealed, long_term)?;

        if grant.target != self.target {
            return Err(BankingError::tampered(format!(
                "grant names target {} but the handshake was started toward {}",
                grant.target, self.target
            )));
        }
        if grant.freshness != self.freshness {
            return Err(BankingError::tampered(format!(
                "grant echoes freshness token {} but {} was sent",
                grant.freshness, self.freshness
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let present = PresentTicketRequest {
            session_id: session_id.clone(),
            ticket: grant.target_ticket,
            freshness: FreshnessToken::now(),
        };
        let granted = GrantedHandshake {
            session_id,
            target: self.target,
            keys: KeyMaterial::new(grant.session_key, grant.session_iv),
        };
        Ok((granted, present))
    }
}

/// Grant verified and ticket relayed, waiting on the responder's challenge.
#[derive(Debug)]
pub struct GrantedHandshake {
    session_id: String,
    target: Principal,
    keys: KeyMaterial,
}

impl GrantedHandshake {
    /// Steps 4 and 5: open the challenge and build the liveness proof.
    ///
    /// The proof is the challenge nonce minus one, sealed back under the
    /// session key. A challenge that does not open under the session key
    /// means the responder never adopted this session's material.
    pub fn answer_challenge(
        self,
        sealed: &EncryptedEnvelope,
    ) -> Result<(EstablishedSession, StillAliveRequest), BankingError> {
        let challenge: NonceChallenge = envelope::open(sealed, &self.keys)?;

        let reply = envelope::seal(
            &NonceReply {
                nonce: challenge.nonce.wrapping_sub(1),
            },
            &self.keys,
        )?;

        let proof = StillAliveRequest {
            session_id: self.session_id.clone(),
            reply: reply.into_bytes(),
        };
        let session = EstablishedSession {
            session_id: self.session_id,
            keys: self.keys,
            peer: self.target,
        };
        Ok((session, proof))
    }
}

// In-process transports. Deployments with a network between the parties
// implement the same traits over their wire of choice.
impl AuthenticationApi for crate::kdc::KeyDistributionCenter {
    fn authenticate(&self, request: &[u8]) -> Result<EncryptedEnvelope, BankingError> {
        self.authenticate_raw(request)
    }
}

impl HandshakeApi for crate::session::responder::SessionResponder {
    fn present_ticket(&self, request: &PresentTicketRequest) -> Result<EncryptedEnvelope, BankingError> {
        crate::session::responder::SessionResponder::present_ticket(self, request)
    }

    fn still_alive(&self, request: &StillAliveRequest) -> Result<(), BankingError> {
        crate::session::responder::SessionResponder::still_alive(self, request)
    }
}
