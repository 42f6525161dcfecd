//! # Session Responder
//!
//! Steps 3 through 5 of the handshake, as seen by the server being
//! contacted. The responder owns a keyed table of handshake state
//! machines, one per session identifier:
//!
//! ```text
//!   AwaitingTicket ──present_ticket──► ChallengeIssued ──still_alive──► Established
//!         ▲                                   │ (bad liveness proof)
//!         └───────────────────────────────────┘
//! ```
//!
//! `AwaitingTicket` is represented by absence from the table. The state is
//! keyed by an explicit session identifier: concurrent handshakes from
//! different initiators land in different entries and cannot corrupt each
//! other's nonce or session key. Presenting a ticket for an identifier
//! that is already in flight replaces the old context wholesale, so a
//! half-built or stale handshake never leaks into the new one.
//!
//! Established sessions do not expire on their own; `discard_session` is
//! the hook for whatever timeout policy the transport layer enforces.
//! Known limitation, recorded in DESIGN.md.

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::envelope::{self, EncryptedEnvelope};
use crate::error::BankingError;
use crate::kdc::Ticket;
use crate::principal::{KeyMaterial, Principal};
use crate::replay::{FreshnessToken, OperationKind, ReplayGuard};

/// Handshake step 3: the initiator relays the KDC's target ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentTicketRequest {
    /// Initiator-chosen identifier for this session.
    pub session_id: String,
    /// The sealed target ticket, opaque to the initiator.
    pub ticket: Vec<u8>,
    /// Single-use token for the `PresentTicket` operation kind.
    pub freshness: FreshnessToken,
}

/// Handshake step 4 payload: sealed under the new session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceChallenge {
    /// Random value the initiator must transform to prove liveness.
    pub nonce: i64,
}

/// Handshake step 5: the initiator's sealed liveness proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StillAliveRequest {
    /// The session the proof belongs to.
    pub session_id: String,
    /// Sealed [`NonceReply`].
    pub reply: Vec<u8>,
}

/// The plaintext inside a step-5 reply: the challenge nonce minus one.
///
/// Deliberately not a MAC. Decrypting the challenge and answering with a
/// deterministic transform proves the peer can use the session key right
/// now; it does not cryptographically bind the reply to this handshake
/// instance. See the note in DESIGN.md before "fixing" it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceReply {
    /// Must equal the issued nonce minus one.
    pub nonce: i64,
}

/// Everything the responder holds for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    keys: KeyMaterial,
    peer: Principal,
    /// Issued in step 4, consumed in step 5.
    nonce: Option<i64>,
}

impl SessionContext {
    /// The negotiated session keying material.
    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// The authenticated peer on the other end.
    pub fn peer(&self) -> Principal {
        self.peer
    }
}

#[derive(Debug)]
enum HandshakeState {
    ChallengeIssued(SessionContext),
    Established(SessionContext),
}

/// The server half of the handshake plus the table of live sessions.
pub struct SessionResponder {
    identity: Principal,
    expected_source: Principal,
    long_term: KeyMaterial,
    replay: ReplayGuard,
    sessions: DashMap<String, HandshakeState>,
}

impl SessionResponder {
    /// A responder acting as `identity`, accepting tickets whose source is
    /// `expected_source`, unsealing them with its own long-term material.
    pub fn new(identity: Principal, expected_source: Principal, long_term: KeyMaterial) -> Self {
        SessionResponder {
            identity,
            expected_source,
            long_term,
            replay: ReplayGuard::new(),
            sessions: DashMap::new(),
        }
    }

    /// Handshake steps 3 and 4: consume a ticket, issue a challenge.
    ///
    /// On success the session moves to `ChallengeIssued` and the returned
    /// envelope holds the nonce, sealed under the freshly adopted session
    /// key. Any failure leaves the table entry untouched (the state stays
    /// `AwaitingTicket` from this call's perspective).
    pub fn present_ticket(
        &self,
        request: &PresentTicketRequest,
    ) -> Result<EncryptedEnvelope, BankingError> {
        let sealed = EncryptedEnvelope::from_bytes(request.ticket.clone());
        let ticket: Ticket = envelope::open(&sealed, &self.long_term)?;

        if ticket.source != self.expected_source {
            warn!(session = %request.session_id, source = %ticket.source, "ticket names an unexpected source");
            return Err(BankingError::tampered(format!(
                "ticket source {} does not match expected origin {}",
                ticket.source, self.expected_source
            )));
        }
        if ticket.target != self.identity {
            warn!(session = %request.session_id, target = %ticket.target, "ticket addressed to another principal");
            return Err(BankingError::tampered(format!(
                "ticket target {} does not match responder identity {}",
                ticket.target, self.identity
            )));
        }

        // Replay is checked only after the ticket itself validates, so a
        // tampered or misaddressed presentation does not burn the token.
        self.replay
            .check_and_record(OperationKind::PresentTicket, request.freshness)?;

        let keys = KeyMaterial::new(ticket.session_key, ticket.session_iv);
        let nonce: i64 = OsRng.gen();
        let challenge = envelope::seal(&NonceChallenge { nonce }, &keys)?;

        // A fresh context replaces anything previously tracked under this
        // identifier; handshakes never share state.
        let context = SessionContext {
            keys,
            peer: ticket.source,
            nonce: Some(nonce),
        };
        self.sessions
            .insert(request.session_id.clone(), HandshakeState::ChallengeIssued(context));

        debug!(session = %request.session_id, peer = %ticket.source, "ticket accepted, challenge issued");
        Ok(challenge)
    }

    /// Handshake step 5: verify the liveness proof.
    ///
    /// The proof must decrypt under the session key to exactly the issued
    /// nonce minus one. A wrong value or an unopenable reply discards the
    /// half-built context entirely, returning that session identifier to
    /// `AwaitingTicket`. Calling this before `present_ticket`, or again
    /// after establishment, is an out-of-order protocol violation.
    pub fn still_alive(&self, request: &StillAliveRequest) -> Result<(), BankingError> {
        let (session_id, state) = self
            .sessions
            .remove(&request.session_id)
            .ok_or_else(|| {
                BankingError::protocol(format!(
                    "no handshake in progress for session {}",
                    request.session_id
                ))
            })?;

        let mut context = match state {
            HandshakeState::ChallengeIssued(context) => context,
            HandshakeState::Established(context) => {
                // A stray proof must not tear down a live session.
                self.sessions
                    .insert(session_id, HandshakeState::Established(context));
                return Err(BankingError::protocol(
                    "liveness proof received after session establishment",
                ));
            }
        };

        let issued = context
            .nonce
            .take()
            .ok_or_else(|| BankingError::protocol("challenge nonce already consumed"))?;

        let sealed = EncryptedEnvelope::from_bytes(request.reply.clone());
        let reply: NonceReply = envelope::open(&sealed, &context.keys)?;

        if issued.wrapping_sub(reply.nonce) != 1 {
            warn!(session = %session_id, "liveness proof mismatch, discarding session context");
            return Err(BankingError::tampered(
                "liveness proof does not match the issued nonce",
            ));
        }

        info!(session = %session_id, peer = %context.peer, "session established");
        self.sessions
            .insert(session_id, HandshakeState::Established(context));
        Ok(())
    }

    /// Keying material for an established session.
    ///
    /// Sessions that are absent or still mid-handshake are a protocol
    /// violation: no partial session is ever visible to business calls.
    pub fn session_keys(&self, session_id: &str) -> Result<KeyMaterial, BankingError> {
        match self.sessions.get(session_id) {
            Some(state) => match state.value() {
                HandshakeState::Established(context) => Ok(context.keys().clone()),
                HandshakeState::ChallengeIssued(_) => Err(BankingError::protocol(format!(
                    "session {session_id} has not completed its handshake"
                ))),
            },
            None => Err(BankingError::protocol(format!(
                "unknown session {session_id}"
            ))),
        }
    }

    /// Drop a session (timeout or cancellation upstream). Half-built and
    /// established sessions alike simply disappear.
    pub fn discard_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
