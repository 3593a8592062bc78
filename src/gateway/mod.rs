//! Gateway layer: message envelopes and per-connection sessions.
//!
//! The store is exposed over a bidirectional message channel. This module
//! owns everything up to the wire: the envelope types, their validation,
//! the conversion from wire predicates to [`Set`](crate::Set)s, and the
//! [`Session`] that executes decoded messages against the store under a
//! per-connection identity. The socket framing, ping/pong handling, and
//! the byte-level envelope codec live outside the core; a transport feeds
//! decoded [`Message`]s in and implements [`MessageSender`] for the way
//! back.

mod message;
mod session;

pub use message::{
    Data, Identity, Match, Message, MutateRequest, Outcome, SubscribeRequest, Unsubscribe,
};
pub use session::{AnonymousIdentifier, Gateway, Identifier, MessageSender, Session};
