//! Error taxonomy for the Meridian protocol core.
//!
//! Four failure kinds cover everything the security layer can reject, and
//! every one of them aborts the current call with no partial mutation:
//!
//! - **Replay** — a freshness token was already accepted for this
//!   operation kind.
//! - **Tampered** — an integrity check failed, or a protocol field
//!   (source, target, echoed freshness, liveness nonce) does not match
//!   what the receiver expected.
//! - **Protocol** — a malformed request, an unknown principal, or a
//!   handshake step arriving out of order.
//! - **Credential** — the business layer rejected a password or ownership
//!   check.
//!
//! None of these are retried automatically. Re-running a handshake after a
//! failure is a caller decision, not ours.

use thiserror::Error;

use crate::replay::{FreshnessToken, OperationKind};

/// The reasons a Meridian call can be rejected.
///
/// Lower-level crypto modules keep their own `thiserror` enums
/// ([`EnvelopeError`](crate::crypto::envelope::EnvelopeError),
/// [`SealError`](crate::crypto::password::SealError)) and convert into this
/// one at the protocol boundary, so callers only ever match on four kinds.
#[derive(Debug, Error)]
pub enum BankingError {
    /// The freshness token was already accepted for this operation kind.
    #[error("replay detected for {kind}: freshness token {token} was already accepted")]
    Replay {
        /// The operation kind whose token set matched.
        kind: OperationKind,
        /// The rejected token.
        token: FreshnessToken,
    },

    /// An integrity check or a protocol field comparison failed.
    #[error("message integrity violated: {0}")]
    Tampered(String),

    /// Malformed request, unknown principal, or out-of-order handshake step.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Password or ownership check failed in the business layer.
    #[error("credential rejected: {0}")]
    Credential(String),
}

impl BankingError {
    /// Shorthand for a [`BankingError::Tampered`] with a formatted reason.
    pub fn tampered(reason: impl Into<String>) -> Self {
        BankingError::Tampered(reason.into())
    }

    /// Shorthand for a [`BankingError::Protocol`] with a formatted reason.
    pub fn protocol(reason: impl Into<String>) -> Self {
        BankingError::Protocol(reason.into())
    }

    /// Shorthand for a [`BankingError::Credential`] with a formatted reason.
    pub fn credential(reason: impl Into<String>) -> Self {
        BankingError::Credential(reason.into())
    }
}
