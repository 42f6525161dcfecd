//! # Replay Guard
//!
//! Per-operation-kind de-duplication of freshness tokens.
//!
//! Every protocol message carries a [`FreshnessToken`], a millisecond
//! timestamp compared by exact value equality. Within one operation kind a
//! token is single-use: the first `check_and_record` accepts it, every
//! later call with the same pair rejects it, no matter whether the repeat
//! arrives "earlier" or "later" by wall clock. Distinct operation kinds
//! keep independent sets, so a token reused across kinds is not a replay.
//!
//! ## Retention
//!
//! Remembering every token forever would grow memory without bound on a
//! long-lived server. The guard keeps a sliding window keyed off the
//! tokens' own timestamp values: once a token falls a full
//! [`REPLAY_RETENTION_MS`] behind the newest accepted token for its kind
//! it is pruned, and anything at or behind that pruning horizon is
//! rejected outright. A pruned token can therefore never be accepted a
//! second time; within the window the accept/reject behavior is identical
//! to an unbounded set.
//!
//! ## Concurrency
//!
//! Check-then-insert is one indivisible step under a single lock. Two
//! concurrent identical requests cannot both be accepted.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::REPLAY_RETENTION_MS;
use crate::error::BankingError;

// ---------------------------------------------------------------------------
// Operation Kinds
// ---------------------------------------------------------------------------

/// The protocol operations that carry a freshness token.
///
/// Each kind owns an independent token set in the [`ReplayGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Handshake step 1: a ticket request at the key distribution center.
    Authenticate,
    /// Handshake step 3: a ticket presented to a session responder.
    PresentTicket,
    /// Business call: open a new account.
    CreateAccount,
    /// Business call: close an account.
    DeleteAccount,
    /// Business call: query an account balance.
    Balance,
    /// Business call: list account movements.
    GetMovements,
    /// Business call: record an expense.
    AddExpense,
    /// Business call: order a payment to another account.
    OrderPayment,
}

impl OperationKind {
    fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Authenticate => "authenticate",
            OperationKind::PresentTicket => "present_ticket",
            OperationKind::CreateAccount => "create_account",
            OperationKind::DeleteAccount => "delete_account",
            OperationKind::Balance => "balance",
            OperationKind::GetMovements => "get_movements",
            OperationKind::AddExpense => "add_expense",
            OperationKind::OrderPayment => "order_payment",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Freshness Tokens
// ---------------------------------------------------------------------------

/// A single-use timestamp attached to every protocol message.
///
/// Unix milliseconds. Equality is exact value equality; the guard never
/// orders tokens against the receiver's clock, only against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreshnessToken(i64);

impl FreshnessToken {
    /// A token for the current wall-clock instant.
    ///
    /// Strictly increasing within a process: two calls in the same
    /// millisecond yield distinct values, so a well-behaved sender never
    /// trips its own replay guard by issuing requests quickly.
    pub fn now() -> Self {
        static LAST: AtomicI64 = AtomicI64::new(0);
        let wall = Utc::now().timestamp_millis();
        loop {
            let last = LAST.load(Ordering::SeqCst);
            let candidate = wall.max(last + 1);
            if LAST
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return FreshnessToken(candidate);
            }
        }
    }

    /// Wrap an explicit millisecond value. Mainly for tests and for
    /// deserialization at the transport boundary.
    pub fn from_millis(millis: i64) -> Self {
        FreshnessToken(millis)
    }

    /// The raw millisecond value.
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FreshnessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// The Guard
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KindWindow {
    seen: HashSet<i64>,
    /// Newest accepted token value for this kind.
    newest: i64,
    /// Tokens at or below this value are rejected without consulting `seen`.
    horizon: i64,
}

impl KindWindow {
    fn empty() -> Self {
        KindWindow {
            seen: HashSet::new(),
            newest: i64::MIN,
            horizon: i64::MIN,
        }
    }
}

/// Shared, synchronized replay state for one server process.
///
/// One guard instance is shared by every worker serving inbound calls; the
/// interior mutex makes check-then-insert atomic.
#[derive(Debug)]
pub struct ReplayGuard {
    retention_ms: i64,
    windows: Mutex<HashMap<OperationKind, KindWindow>>,
}

impl ReplayGuard {
    /// A guard with the default retention window from [`crate::config`].
    pub fn new() -> Self {
        Self::with_retention(REPLAY_RETENTION_MS)
    }

    /// A guard with an explicit retention window in milliseconds.
    pub fn with_retention(retention_ms: i64) -> Self {
        ReplayGuard {
            retention_ms,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Accept a token exactly once per operation kind.
    ///
    /// Returns `Ok(())` and records the token on first sight. Returns
    /// [`BankingError::Replay`] if the token was already accepted for this
    /// kind, or if it sits at or behind the pruning horizon (where we can
    /// no longer prove it was never seen).
    pub fn check_and_record(
        &self,
        kind: OperationKind,
        token: FreshnessToken,
    ) -> Result<(), BankingError> {
        let mut windows = self.windows.lock();
        let window = windows.entry(kind).or_insert_with(KindWindow::empty);

        if token.as_millis() <= window.horizon {
            return Err(BankingError::Replay { kind, token });
        }
        if !window.seen.insert(token.as_millis()) {
            return Err(BankingError::Replay { kind, token });
        }

        if token.as_millis() > window.newest {
            window.newest = token.as_millis();
            window.horizon = window.newest.saturating_sub(self.retention_ms);
            let horizon = window.horizon;
            window.seen.retain(|&t| t > horizon);
        }
        Ok(())
    }

    /// Number of tokens currently retained for a kind. Observability hook;
    /// also exercised by the retention tests.
    pub fn retained(&self, kind: OperationKind) -> usize {
        self.windows
            .lock()
            .get(&kind)
            .map(|w| w.seen.len())
            .unwrap_or(0)
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
