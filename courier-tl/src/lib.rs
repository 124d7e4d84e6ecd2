//! TL types, functions and the wire codec used by the courier client.
//!
//! Unlike a full generated binding this crate carries a **hand-maintained
//! subset** of the schema: the MTProto service constructors plus the API
//! surface the client core actually exercises. Layer-dependent secret-chat
//! payloads are not modelled as structs at all — the secret-chat engine
//! composes them through [`Serializer`] and the constructor ids in
//! [`codes`], the same way it composes resends from journaled blobs.
//!
//! | Module | Contents |
//! |---|---|
//! | [`serialize`] / [`deserialize`] | Wire codec traits and primitives |
//! | [`serializer`] | Word-oriented write buffer for composed payloads |
//! | [`mtproto`] | Service-level constructors (handshake, acks, pings) |
//! | [`schema`] | API functions / types / enums |
//! | [`codes`] | Raw constructor ids for composed payloads |

#![deny(unsafe_code)]
#![allow(clippy::large_enum_variant)]

pub mod codes;
pub mod deserialize;
pub mod mtproto;
pub mod schema;
pub mod serialize;
pub mod serializer;

pub use deserialize::{Cursor, Deserializable};
pub use schema::{enums, functions, types};
pub use serialize::Serializable;
pub use serializer::Serializer;

/// The API layer this library advertises in `invoke_with_layer`.
pub const LAYER: i32 = 45;

/// Bare `vector` — a length-prefixed list without the boxed `Vector`
/// constructor id in front.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Every constructor has a unique 32-bit id.
pub trait Identifiable {
    const CONSTRUCTOR_ID: u32;
}

/// A function that can be sent to the server as an RPC call.
///
/// `Return` is the type the server answers with.
pub trait RemoteCall: Serializable {
    type Return: Deserializable;
}
