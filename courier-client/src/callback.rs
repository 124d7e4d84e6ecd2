//! The application callback sink.
//!
//! The engine pushes everything user-visible through this trait; the
//! embedding application implements whichever hooks it cares about. All
//! methods default to no-ops so sinks stay small.

use courier_tl::enums;

/// What kind of value the engine is asking the application for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    PhoneNumber,
    LoginCode,
    Password,
    /// First and last name, requested when the account needs sign-up.
    ProfileName,
}

/// Reply handle for [`EventSink::get_values`].
pub type ValueReply = Box<dyn FnOnce(Vec<String>) + Send>;

/// A decrypted secret-chat message in application-facing form.
#[derive(Clone, Debug)]
pub struct IncomingSecretMessage {
    pub chat_id: i32,
    pub random_id: i64,
    pub date: i64,
    pub out_seq_no: i32,
    /// Text payload when the message was a plain text variant.
    pub text: Option<String>,
    /// The raw decrypted message body for everything else.
    pub raw: Vec<u8>,
}

/// Where engine events land in the embedding application.
pub trait EventSink: Send + Sync {
    /// Ask the user for `count` values of the given kind.
    fn get_values(&self, kind: ValueKind, prompt: &str, count: usize, reply: ValueReply) {
        let _ = (kind, prompt, count);
        reply(Vec::new());
    }

    fn started(&self) {}
    fn logged_in(&self) {}
    fn logged_out(&self, _success: bool) {}
    fn login_failed(&self) {}

    fn new_messages(&self, _messages: &[enums::Message]) {}
    fn update_messages(&self, _messages: &[enums::Message]) {}
    /// A pending outbound message got its server id.
    fn message_sent(&self, _local_id: i64, _server_id: i32, _seq: i32) {}
    fn message_deleted(&self, _id: i32) {}
    fn messages_mark_read_in(&self, _peer: enums::Peer, _pts: i32) {}

    fn new_secret_message(&self, _message: &IncomingSecretMessage) {}
    fn secret_chat_update(&self, _chat_id: i32) {}

    fn new_user(&self, _user: &enums::User) {}
    fn user_deleted(&self, _id: i32) {}
    fn channel_update_participants(&self, _channel_id: i32, _users: &[i32]) {}
}

/// A sink that ignores everything. Useful for tests and tools that only
/// drive explicit calls.
pub struct NullSink;

impl EventSink for NullSink {}
