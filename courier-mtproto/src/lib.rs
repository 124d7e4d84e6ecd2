//! MTProto session and framing layer.
//!
//! This crate handles:
//! * client message ids and sequence numbers
//! * plaintext framing (for the auth-key handshake)
//! * encrypted framing and the server-ack bookkeeping
//! * the sans-IO handshake state machine
//!
//! It is transport-agnostic: the client crate supplies the byte stream.

#![deny(unsafe_code)]

pub mod authentication;
pub mod message;
pub mod session;
pub mod transport;

pub use message::PlainMessage;
pub use session::{InboundMessage, PackedMessage, Session, SessionError};
