// Copyright (c) 2026 Meridian Bank. MIT License.
// See LICENSE for details.

//! # Meridian Protocol — Core Library
//!
//! The mutual-authentication and message-protection layer every Meridian
//! RPC rides on. Banking software has exactly one interesting security
//! property: the party moving your money must be who they claim, every
//! single call, even when the network in between is hostile.
//!
//! Meridian takes the classic route: a Needham-Schroeder-style ticket
//! exchange through a key distribution center, a nonce liveness proof, and
//! then AES-256-GCM envelopes with per-call replay protection for the
//! actual banking traffic. Passwords get an extra X25519 seal so relaying
//! servers never see them in the clear.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! bank's RPC plane:
//!
//! - **crypto** — Envelope sealing and password sealing. Audited primitives only.
//! - **principal** — Who can hold keys: user, bank, database.
//! - **replay** — Freshness tokens and the never-accept-twice guard.
//! - **kdc** — The key distribution center; handshake steps 1 and 2.
//! - **session** — Initiator and responder state machines; steps 3 through 5.
//! - **gateway** — The six business calls over one sealed pipeline.
//! - **client** — The user-side mirror of the gateway.
//! - **ledger** — The business collaborator behind the gateway.
//! - **config** — Protocol constants. Change these and old peers hate you.
//!
//! ## Design Philosophy
//!
//! 1. No plaintext leaves a principal unless the protocol says so.
//! 2. Every rejection is loud and classified: replay, tamper, protocol, credential.
//! 3. Failed calls mutate nothing. Half-applied is worse than refused.
//! 4. If it touches money, it has tests. Plural.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod kdc;
pub mod ledger;
pub mod principal;
pub mod replay;
pub mod session;
