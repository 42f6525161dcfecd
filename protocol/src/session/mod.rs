//! # Session Establishment
//!
//! The mutual-authentication handshake, split into its two halves. The
//! [`initiator`] drives the five steps from the client side as a typestate
//! ladder; the [`responder`] tracks per-session handshake state machines
//! on the server side. Wire types for steps 3 through 5 live with the
//! responder, since it defines what it is willing to accept.

pub mod initiator;
pub mod responder;

pub use initiator::{
    AuthenticationApi, EstablishedSession, GrantedHandshake, HandshakeApi, PendingHandshake,
    SessionInitiator,
};
pub use responder::{
    NonceChallenge, NonceReply, PresentTicketRequest, SessionResponder, StillAliveRequest,
};
