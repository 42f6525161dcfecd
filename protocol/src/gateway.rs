//! # Banking Gateway
//!
//! The database-facing server's business surface. Every one of the six
//! business calls rides the same rails: look up the caller's established
//! session, open the envelope, replay-check the embedded freshness token,
//! hand the request to the ledger, seal the reply. That pipeline is
//! written exactly once in [`BankingGateway::handle`]; the six operations
//! only differ in payload shape and the ledger method they delegate to.
//!
//! Credentials arrive doubly protected: the envelope under the session
//! key, and the password inside it sealed asymmetrically for this gateway,
//! so the bank-facing hop that relayed the message never saw it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use x25519_dalek::StaticSecret;

use crate::crypto::envelope::{self, EncryptedEnvelope};
use crate::crypto::password::{unseal_password, SealedPassword};
use crate::error::BankingError;
use crate::ledger::{LedgerOperations, Movement};
use crate::replay::{FreshnessToken, OperationKind, ReplayGuard};
use crate::session::responder::SessionResponder;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One business call or reply on the wire: a session identifier in the
/// clear for routing, everything else sealed under that session's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub session_id: String,
    /// An [`EncryptedEnvelope`] in byte form.
    pub body: Vec<u8>,
}

/// Payload of `CreateAccount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountPayload {
    pub holders: Vec<String>,
    pub password: SealedPassword,
    pub freshness: FreshnessToken,
}

/// Payload of `DeleteAccount`, `Balance`, and `GetMovements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPayload {
    pub username: String,
    pub password: SealedPassword,
    pub freshness: FreshnessToken,
}

/// Payload of `AddExpense`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddExpensePayload {
    pub username: String,
    pub password: SealedPassword,
    pub date: DateTime<Utc>,
    pub amount_cents: i64,
    pub description: String,
    pub freshness: FreshnessToken,
}

/// Payload of `OrderPayment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaymentPayload {
    pub username: String,
    pub password: SealedPassword,
    pub date: DateTime<Utc>,
    pub amount_cents: i64,
    pub description: String,
    pub recipient: String,
    pub freshness: FreshnessToken,
}

/// Reply to `Balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReply {
    pub balance_cents: i64,
}

/// Reply to `GetMovements`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementsReply {
    pub movements: Vec<Movement>,
}

/// Reply to the mutating calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {}

/// Business payloads all carry a single-use freshness token.
pub trait Timestamped {
    fn freshness(&self) -> FreshnessToken;
}

macro_rules! timestamped {
    ($($payload:ty),+ $(,)?) => {
        $(impl Timestamped for $payload {
            fn freshness(&self) -> FreshnessToken {
                self.freshness
            }
        })+
    };
}

timestamped!(CreateAccountPayload, AccountPayload, AddExpensePayload, OrderPaymentPayload);

// ---------------------------------------------------------------------------
// The gateway
// ---------------------------------------------------------------------------

/// What a client can ask of the business surface, post-handshake.
pub trait BankingApi {
    fn create_account(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
    fn delete_account(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
    fn balance(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
    fn get_movements(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
    fn add_expense(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
    fn order_payment(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError>;
}

/// The six business operations over one shared pipeline.
pub struct BankingGateway<L: LedgerOperations> {
    responder: Arc<SessionResponder>,
    replay: ReplayGuard,
    password_key: StaticSecret,
    ledger: L,
}

impl<L: LedgerOperations> BankingGateway<L> {
    /// A gateway serving sessions established by `responder`, unsealing
    /// passwords with `password_key`, delegating to `ledger`.
    pub fn new(responder: Arc<SessionResponder>, password_key: StaticSecret, ledger: L) -> Self {
        BankingGateway {
            responder,
            replay: ReplayGuard::new(),
            password_key,
            ledger,
        }
    }

    /// The one pipeline every business call goes through.
    ///
    /// Order matters: the envelope must open (proving the caller holds the
    /// session key) before the freshness token inside it is trusted enough
    /// to record, and the replay check must pass before the ledger is
    /// touched. A failure at any stage makes no ledger call and leaves no
    /// state behind except the replay record itself once accepted.
    fn handle<P, R>(
        &self,
        kind: OperationKind,
        message: &SealedMessage,
        op: impl FnOnce(&L, &P) -> Result<R, BankingError>,
    ) -> Result<SealedMessage, BankingError>
    where
        P: DeserializeOwned + Timestamped,
        R: Serialize,
    {
        let keys = self.responder.session_keys(&message.session_id)?;

        let sealed = EncryptedEnvelope::from_bytes(message.body.clone());
        let payload: P = envelope::open(&sealed, &keys)?;

        if let Err(err) = self.replay.check_and_record(kind, payload.freshness()) {
            warn!(session = %message.session_id, %kind, "rejected replayed business call");
            return Err(err);
        }

        let reply = op(&self.ledger, &payload)?;
        debug!(session = %message.session_id, %kind, "business call served");

        let body = envelope::seal(&reply, &keys)?.into_bytes();
        Ok(SealedMessage {
            session_id: message.session_id.clone(),
            body,
        })
    }

    /// Recover a plaintext password sealed for this gateway.
    fn open_password(&self, sealed: &SealedPassword) -> Result<Vec<u8>, BankingError> {
        Ok(unseal_password(sealed, &self.password_key)?)
    }
}

impl<L: LedgerOperations> BankingApi for BankingGateway<L> {
    fn create_account(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::CreateAccount, message, |ledger, p: &CreateAccountPayload| {
            let password = self.open_password(&p.password)?;
            ledger.create_account(&p.holders, &password)?;
            Ok(Ack {})
        })
    }

    fn delete_account(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::DeleteAccount, message, |ledger, p: &AccountPayload| {
            let password = self.open_password(&p.password)?;
            ledger.delete_account(&p.username, &password)?;
            Ok(Ack {})
        })
    }

    fn balance(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::Balance, message, |ledger, p: &AccountPayload| {
            let password = self.open_password(&p.password)?;
            let balance_cents = ledger.balance(&p.username, &password)?;
            Ok(BalanceReply { balance_cents })
        })
    }

    fn get_movements(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::GetMovements, message, |ledger, p: &AccountPayload| {
            let password = self.open_password(&p.password)?;
            let movements = ledger.get_movements(&p.username, &password)?;
            Ok(MovementsReply { movements })
        })
    }

    fn add_expense(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::AddExpense, message, |ledger, p: &AddExpensePayload| {
            let password = self.open_password(&p.password)?;
            ledger.add_expense(&p.username, &password, p.date, p.amount_cents, &p.description)?;
            Ok(Ack {})
        })
    }

    fn order_payment(&self, message: &SealedMessage) -> Result<SealedMessage, BankingError> {
        self.handle(OperationKind::OrderPayment, message, |ledger, p: &OrderPaymentPayload| {
            let password = self.open_password(&p.password)?;
            ledger.order_payment(
                &p.username,
                &password,
                p.date,
                p.amount_cents,
                &p.description,
                &p.recipient,
            )?;
            Ok(Ack {})
        })
    }
}
