//! # Banking Client
//!
//! The user-side business surface, used once a handshake has produced an
//! [`EstablishedSession`]. Mirrors the gateway's single-pipeline shape:
//! one generic `call` that seals the payload, dispatches it, validates the
//! reply's session binding, and opens the answer; six thin typed wrappers
//! that build the payloads. Passwords are sealed for the far-end database
//! before they ever enter the envelope, so the relaying bank server only
//! ever handles an opaque blob.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use x25519_dalek::PublicKey;

use crate::crypto::envelope::{self, EncryptedEnvelope};
use crate::crypto::password::{seal_password, SealedPassword};
use crate::error::BankingError;
use crate::gateway::{
    AccountPayload, Ack, AddExpensePayload, BalanceReply, BankingApi, CreateAccountPayload,
    MovementsReply, OrderPaymentPayload, SealedMessage,
};
use crate::ledger::Movement;
use crate::replay::FreshnessToken;
use crate::session::initiator::EstablishedSession;
use chrono::{DateTime, Utc};

/// A user's handle on the banking surface over one established session.
pub struct BankingClient<'a, A: BankingApi> {
    session: EstablishedSession,
    /// The database's public password-seal key.
    password_recipient: PublicKey,
    api: &'a A,
}

impl<'a, A: BankingApi> BankingClient<'a, A> {
    pub fn new(session: EstablishedSession, password_recipient: PublicKey, api: &'a A) -> Self {
        BankingClient {
            session,
            password_recipient,
            api,
        }
    }

    /// The session this client operates over.
    pub fn session(&self) -> &EstablishedSession {
        &self.session
    }

    /// Seal, dispatch, validate, open. A reply bound to a different
    /// session identifier than the request was sent on is treated as
    /// tampering; a reply that does not open under the session key fails
    /// the same way inside [`envelope::open`].
    fn call<P, R>(
        &self,
        payload: &P,
        dispatch: impl FnOnce(&A, &SealedMessage) -> Result<SealedMessage, BankingError>,
    ) -> Result<R, BankingError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let message = SealedMessage {
            session_id: self.session.session_id().to_string(),
            body: envelope::seal(payload, self.session.keys())?.into_bytes(),
        };
        let reply = dispatch(self.api, &message)?;

        if reply.session_id != self.session.session_id() {
            return Err(BankingError::tampered(format!(
                "reply bound to session {} but the call went out on {}",
                reply.session_id,
                self.session.session_id()
            )));
        }
        let sealed = EncryptedEnvelope::from_bytes(reply.body);
        let opened = envelope::open(&sealed, self.session.keys())?;
        debug!(session = %self.session.session_id(), "business reply opened");
        Ok(opened)
    }

    fn seal_credential(&self, password: &[u8]) -> Result<SealedPassword, BankingError> {
        Ok(seal_password(password, &self.password_recipient)?)
    }

    pub fn create_account(&self, holders: &[String], password: &[u8]) -> Result<(), BankingError> {
        let payload = CreateAccountPayload {
            holders: holders.to_vec(),
            password: self.seal_credential(password)?,
            freshness: FreshnessToken::now(),
        };
        let _: Ack = self.call(&payload, |api, m| api.create_account(m))?;
        Ok(())
    }

    pub fn delete_account(&self, username: &str, password: &[u8]) -> Result<(), BankingError> {
        let payload = self.account_payload(username, password)?;
        let _: Ack = self.call(&payload, |api, m| api.delete_account(m))?;
        Ok(())
    }

    pub fn balance(&self, username: &str, password: &[u8]) -> Result<i64, BankingError> {
        let payload = self.account_payload(username, password)?;
        let reply: BalanceReply = self.call(&payload, |api, m| api.balance(m))?;
        Ok(reply.balance_cents)
    }

    pub fn get_movements(&self, username: &str, password: &[u8]) -> Result<Vec<Movement>, BankingError> {
        let payload = self.account_payload(username, password)?;
        let reply: MovementsReply = self.call(&payload, |api, m| api.get_movements(m))?;
        Ok(reply.movements)
    }

    pub fn add_expense(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
    ) -> Result<(), BankingError> {
        let payload = AddExpensePayload {
            username: username.to_string(),
            password: self.seal_credential(password)?,
            date,
            amount_cents,
            description: description.to_string(),
            freshness: FreshnessToken::now(),
        };
        let _: Ack = self.call(&payload, |api, m| api.add_expense(m))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn order_payment(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
        recipient: &str,
    ) -> Result<(), BankingError> {
        let payload = OrderPaymentPayload {
            username: username.to_string(),
            password: self.seal_credential(password)?,
            date,
            amount_cents,
            description: description.to_string(),
            recipient: recipient.to_string(),
            freshness: FreshnessToken::now(),
        };
        let _: Ack = self.call(&payload, |api, m| api.order_payment(m))?;
        Ok(())
    }

    fn account_payload(&self, username: &str, password: &[u8]) -> Result<AccountPayload, BankingError> {
        Ok(AccountPayload {
            username: username.to_string(),
            password: self.seal_credential(password)?,
            freshness: FreshnessToken::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::BankingGateway;
    use crate::kdc::KeyDistributionCenter;
    use crate::ledger::InMemoryLedger;
    use crate::principal::{KeyDirectory, KeyMaterial, Principal};
    use crate::session::initiator::SessionInitiator;
    use crate::session::responder::SessionResponder;
    use rand::rngs::OsRng;
    use std::sync::Arc;
    use x25519_dalek::StaticSecret;

    fn client_over_fresh_stack() -> (
        BankingGateway<InMemoryLedger>,
        EstablishedSession,
        PublicKey,
    ) {
        let user_keys = KeyMaterial::generate();
        let database_keys = KeyMaterial::generate();
        let mut directory = KeyDirectory::new();
        directory.insert(Principal::User, user_keys.clone());
        directory.insert(Principal::Database, database_keys.clone());

        let kdc = KeyDistributionCenter::new(directory);
        let responder = Arc::new(SessionResponder::new(
            Principal::Database,
            Principal::User,
            database_keys,
        ));
        let session = SessionInitiator::new(Principal::User, user_keys)
            .run(Principal::Database, &kdc, responder.as_ref())
            .unwrap();

        let password_key = StaticSecret::random_from_rng(OsRng);
        let password_public = PublicKey::from(&password_key);
        let gateway = BankingGateway::new(responder, password_key, InMemoryLedger::new());
        (gateway, session, password_public)
    }

    #[test]
    fn typed_calls_roundtrip_through_the_gateway() {
        let (gateway, session, password_public) = client_over_fresh_stack();
        let client = BankingClient::new(session, password_public, &gateway);

        client.create_account(&["alice".to_string()], b"pw").unwrap();
        assert_eq!(client.balance("alice", b"pw").unwrap(), 0);

        client
            .add_expense("alice", b"pw", Utc::now(), 1_250, "coffee machine")
            .unwrap();
        assert_eq!(client.balance("alice", b"pw").unwrap(), -1_250);

        let movements = client.get_movements("alice", b"pw").unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].description, "coffee machine");
    }

    #[test]
    fn payment_between_two_accounts() {
        let (gateway, session, password_public) = client_over_fresh_stack();
        let client = BankingClient::new(session, password_public, &gateway);

        client.create_account(&["alice".to_string()], b"a").unwrap();
        client.create_account(&["bob".to_string()], b"b").unwrap();
        client
            .order_payment("alice", b"a", Utc::now(), 2_000, "lunch", "bob")
            .unwrap();

        assert_eq!(client.balance("alice", b"a").unwrap(), -2_000);
        assert_eq!(client.balance("bob", b"b").unwrap(), 2_000);
    }

    #[test]
    fn credential_errors_surface_to_the_caller() {
        let (gateway, session, password_public) = client_over_fresh_stack();
        let client = BankingClient::new(session, password_public, &gateway);

        client.create_account(&["alice".to_string()], b"pw").unwrap();
        let err = client.balance("alice", b"wrong").unwrap_err();
        assert!(matches!(err, BankingError::Credential(_)));
    }

    #[test]
    fn delete_account_then_balance_fails() {
        let (gateway, session, password_public) = client_over_fresh_stack();
        let client = BankingClient::new(session, password_public, &gateway);

        client.create_account(&["alice".to_string()], b"pw").unwrap();
        client.delete_account("alice", b"pw").unwrap();
        assert!(matches!(
            client.balance("alice", b"pw").unwrap_err(),
            BankingError::Credential(_)
        ));
    }

    #[test]
    fn reply_rebound_to_another_session_rejected() {
        struct Rebinding<'g>(&'g BankingGateway<InMemoryLedger>);
        impl BankingApi for Rebinding<'_> {
            fn create_account(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                let mut reply = self.0.create_account(m)?;
                reply.session_id = "someone-else".to_string();
                Ok(reply)
            }
            fn delete_account(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                self.0.delete_account(m)
            }
            fn balance(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                self.0.balance(m)
            }
            fn get_movements(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                self.0.get_movements(m)
            }
            fn add_expense(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                self.0.add_expense(m)
            }
            fn order_payment(&self, m: &SealedMessage) -> Result<SealedMessage, BankingError> {
                self.0.order_payment(m)
            }
        }

        let (gateway, session, password_public) = client_over_fresh_stack();
        let rebinding = Rebinding(&gateway);
        let client = BankingClient::new(session, password_public, &rebinding);

        let err = client
            .create_account(&["alice".to_string()], b"pw")
            .unwrap_err();
        assert!(matches!(err, BankingError::Tampered(_)));
    }
}
