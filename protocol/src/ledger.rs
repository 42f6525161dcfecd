//! # Ledger Collaborator
//!
//! The business layer the protocol protects. The protocol core only needs
//! the [`LedgerOperations`] trait; real deployments put a relational store
//! behind it. [`InMemoryLedger`] is the reference implementation used by
//! the gateway in tests and demos, and it is where the unit-of-work
//! discipline lives: every operation runs against a scratch copy of the
//! ledger state and is committed only if it returns `Ok`, so a failure
//! partway through a payment can never leave a half-applied transfer.
//!
//! Accounts are keyed by username, may have several holders (joint
//! accounts share one password), start at a zero balance, and record one
//! [`Movement`] per balance change. Amounts are integer cents; floats have
//! no business near money.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::BankingError;

/// One entry in an account's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// When the movement took effect.
    pub date: DateTime<Utc>,
    /// Signed amount in cents; debits are negative.
    pub amount_cents: i64,
    /// Human-readable reason.
    pub description: String,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// What the gateway requires of the business layer.
///
/// Every method takes the already-verified plaintext password; credential
/// checks live here, not in the protocol, and fail with
/// [`BankingError::Credential`].
pub trait LedgerOperations {
    /// Open an account for one or more holders sharing a password.
    fn create_account(&self, holders: &[String], password: &[u8]) -> Result<(), BankingError>;

    /// Close an account. The balance is forfeit.
    fn delete_account(&self, username: &str, password: &[u8]) -> Result<(), BankingError>;

    /// Current balance in cents.
    fn balance(&self, username: &str, password: &[u8]) -> Result<i64, BankingError>;

    /// Full movement history, oldest first.
    fn get_movements(&self, username: &str, password: &[u8]) -> Result<Vec<Movement>, BankingError>;

    /// Record an expense: debits the balance and appends a movement.
    fn add_expense(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
    ) -> Result<(), BankingError>;

    /// Pay another account holder: debits the payer, credits the
    /// recipient, and appends a movement on both sides.
    fn order_payment(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
        recipient: &str,
    ) -> Result<(), BankingError>;
}

const CURRENCY: &str = "EUR";

#[derive(Debug, Clone)]
struct Account {
    holders: Vec<String>,
    password: Vec<u8>,
    balance_cents: i64,
    movements: Vec<Movement>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
}

impl LedgerState {
    fn authorized<'a>(&'a self, username: &str, password: &[u8]) -> Result<&'a Account, BankingError> {
        let account = self
            .accounts
            .get(username)
            .ok_or_else(|| BankingError::credential(format!("no account for {username}")))?;
        if account.password != password {
            return Err(BankingError::credential(format!(
                "wrong password for {username}"
            )));
        }
        Ok(account)
    }

    fn authorized_mut<'a>(&'a mut self, username: &str, password: &[u8]) -> Result<&'a mut Account, BankingError> {
        // Borrow-check friendly double lookup; accounts are small.
        self.authorized(username, password)?;
        self.accounts
            .get_mut(username)
            .ok_or_else(|| BankingError::credential(format!("no account for {username}")))
    }
}

/// In-process ledger with snapshot-based unit-of-work.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` against a scratch copy of the ledger; commit the copy only
    /// if it returns `Ok`. Every exit path either commits or rolls back,
    /// never something in between.
    fn with_unit_of_work<T>(
        &self,
        op: impl FnOnce(&mut LedgerState) -> Result<T, BankingError>,
    ) -> Result<T, BankingError> {
        let mut guard = self.state.lock();
        let mut scratch = guard.clone();
        let out = op(&mut scratch)?;
        *guard = scratch;
        Ok(out)
    }
}

impl LedgerOperations for InMemoryLedger {
    fn create_account(&self, holders: &[String], password: &[u8]) -> Result<(), BankingError> {
        if holders.is_empty() {
            return Err(BankingError::credential("an account needs at least one holder"));
        }
        self.with_unit_of_work(|state| {
            for holder in holders {
                if state.accounts.contains_key(holder) {
                    return Err(BankingError::credential(format!(
                        "account already exists for {holder}"
                    )));
                }
            }
            // Joint accounts: one shared record per holder name, all
            // guarded by the same password.
            for holder in holders {
                state.accounts.insert(
                    holder.clone(),
                    Account {
                        holders: holders.to_vec(),
                        password: password.to_vec(),
                        balance_cents: 0,
                        movements: Vec::new(),
                    },
                );
            }
            info!(holders = holders.len(), "account created");
            Ok(())
        })
    }

    fn delete_account(&self, username: &str, password: &[u8]) -> Result<(), BankingError> {
        self.with_unit_of_work(|state| {
            let holders = state.authorized(username, password)?.holders.clone();
            for holder in &holders {
                state.accounts.remove(holder);
            }
            info!(%username, "account deleted");
            Ok(())
        })
    }

    fn balance(&self, username: &str, password: &[u8]) -> Result<i64, BankingError> {
        let state = self.state.lock();
        Ok(state.authorized(username, password)?.balance_cents)
    }

    fn get_movements(&self, username: &str, password: &[u8]) -> Result<Vec<Movement>, BankingError> {
        let state = self.state.lock();
        Ok(state.authorized(username, password)?.movements.clone())
    }

    fn add_expense(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
    ) -> Result<(), BankingError> {
        if amount_cents <= 0 {
            return Err(BankingError::credential("expense amount must be positive"));
        }
        self.with_unit_of_work(|state| {
            let account = state.authorized_mut(username, password)?;
            account.balance_cents -= amount_cents;
            account.movements.push(Movement {
                date,
                amount_cents: -amount_cents,
                description: description.to_string(),
                currency: CURRENCY.to_string(),
            });
            debug!(%username, amount_cents, "expense recorded");
            Ok(())
        })
    }

    fn order_payment(
        &self,
        username: &str,
        password: &[u8],
        date: DateTime<Utc>,
        amount_cents: i64,
        description: &str,
        recipient: &str,
    ) -> Result<(), BankingError> {
        if amount_cents <= 0 {
            return Err(BankingError::credential("payment amount must be positive"));
        }
        self.with_unit_of_work(|state| {
            if !state.accounts.contains_key(recipient) {
                return Err(BankingError::credential(format!(
                    "no account for recipient {recipient}"
                )));
            }
            let payer = state.authorized_mut(username, password)?;
            payer.balance_cents -= amount_cents;
            payer.movements.push(Movement {
                date,
                amount_cents: -amount_cents,
                description: description.to_string(),
                currency: CURRENCY.to_string(),
            });

            // Presence was checked above; the payer borrow has ended.
            let recipient_account = state
                .accounts
                .get_mut(recipient)
                .ok_or_else(|| BankingError::credential(format!("no account for recipient {recipient}")))?;
            recipient_account.balance_cents += amount_cents;
            recipient_account.movements.push(Movement {
                date,
                amount_cents,
                description: description.to_string(),
                currency: CURRENCY.to_string(),
            });
            debug!(%username, %recipient, amount_cents, "payment ordered");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_account(name: &str) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger
            .create_account(&[name.to_string()], b"secret")
            .unwrap();
        ledger
    }

    #[test]
    fn new_account_starts_at_zero() {
        let ledger = ledger_with_account("alice");
        assert_eq!(ledger.balance("alice", b"secret").unwrap(), 0);
        assert!(ledger.get_movements("alice", b"secret").unwrap().is_empty());
    }

    #[test]
    fn wrong_password_is_a_credential_error() {
        let ledger = ledger_with_account("alice");
        let err = ledger.balance("alice", b"nope").unwrap_err();
        assert!(matches!(err, BankingError::Credential(_)));
    }

    #[test]
    fn unknown_account_is_a_credential_error() {
        let ledger = InMemoryLedger::new();
        let err = ledger.balance("nobody", b"secret").unwrap_err();
        assert!(matches!(err, BankingError::Credential(_)));
    }

    #[test]
    fn duplicate_account_rejected() {
        let ledger = ledger_with_account("alice");
        let err = ledger
            .create_account(&["alice".to_string()], b"other")
            .unwrap_err();
        assert!(matches!(err, BankingError::Credential(_)));
    }

    #[test]
    fn joint_account_shares_balance_and_password() {
        let ledger = InMemoryLedger::new();
        ledger
            .create_account(&["alice".to_string(), "bob".to_string()], b"shared")
            .unwrap();

        ledger
            .add_expense("alice", b"shared", Utc::now(), 1_500, "groceries")
            .unwrap();
        assert_eq!(ledger.balance("bob", b"shared").unwrap(), -1_500);
        assert_eq!(ledger.get_movements("bob", b"shared").unwrap().len(), 1);
    }

    #[test]
    fn expense_debits_and_records_a_movement() {
        let ledger = ledger_with_account("alice");
        let date = Utc::now();
        ledger
            .add_expense("alice", b"secret", date, 2_500, "books")
            .unwrap();

        assert_eq!(ledger.balance("alice", b"secret").unwrap(), -2_500);
        let movements = ledger.get_movements("alice", b"secret").unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].amount_cents, -2_500);
        assert_eq!(movements[0].description, "books");
        assert_eq!(movements[0].currency, "EUR");
    }

    #[test]
    fn payment_moves_money_between_accounts() {
        let ledger = InMemoryLedger::new();
        ledger.create_account(&["alice".to_string()], b"a").unwrap();
        ledger.create_account(&["bob".to_string()], b"b").unwrap();

        ledger
            .order_payment("alice", b"a", Utc::now(), 4_000, "rent", "bob")
            .unwrap();

        assert_eq!(ledger.balance("alice", b"a").unwrap(), -4_000);
        assert_eq!(ledger.balance("bob", b"b").unwrap(), 4_000);
        assert_eq!(
            ledger.get_movements("bob", b"b").unwrap()[0].amount_cents,
            4_000
        );
    }

    #[test]
    fn failed_payment_leaves_no_partial_mutation() {
        let ledger = ledger_with_account("alice");
        let err = ledger
            .order_payment("alice", b"secret", Utc::now(), 4_000, "rent", "nobody")
            .unwrap_err();
        assert!(matches!(err, BankingError::Credential(_)));

        // Rollback: the payer was not debited.
        assert_eq!(ledger.balance("alice", b"secret").unwrap(), 0);
        assert!(ledger.get_movements("alice", b"secret").unwrap().is_empty());
    }

    #[test]
    fn delete_removes_every_holder_entry() {
        let ledger = InMemoryLedger::new();
        ledger
            .create_account(&["alice".to_string(), "bob".to_string()], b"shared")
            .unwrap();
        ledger.delete_account("alice", b"shared").unwrap();

        assert!(ledger.balance("alice", b"shared").is_err());
        assert!(ledger.balance("bob", b"shared").is_err());
    }

    #[test]
    fn nonpositive_amounts_rejected() {
        let ledger = ledger_with_account("alice");
        assert!(ledger
            .add_expense("alice", b"secret", Utc::now(), 0, "zero")
            .is_err());
        assert!(ledger
            .order_payment("alice", b"secret", Utc::now(), -5, "neg", "alice")
            .is_err());
    }
}
