//! The secret-chat engine: end-to-end-encrypted chats with layered
//! payloads, per-chat sequence numbers, strict inbound ordering and the
//! crash-safe outbound journal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use courier_crypto::{self as crypto, sha1, Side};
use courier_tl::codes;
use courier_tl::{enums, Cursor, Deserializable, Serializable, Serializer};
use num_bigint::BigUint;

use crate::callback::IncomingSecretMessage;
use crate::journal::UnconfirmedMessage;
use crate::query::{Query, QueryHandler, QueryPolicy};
use crate::{ExecOption, UserAgent};

/// The highest secret-chat layer this engine can compose.
pub const SECRET_CHAT_MAX_LAYER: i32 = 46;

const CODE_SEND_ENCRYPTED: u32 = 0xa9776773;
const CODE_SEND_ENCRYPTED_FILE: u32 = 0x9a901b66;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretChatState {
    /// We created the chat and wait for the peer to accept.
    Waiting,
    /// The peer created the chat; our accept is in flight.
    RequestSent,
    Ok,
    Deleted,
}

impl SecretChatState {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::RequestSent => 1,
            Self::Ok => 2,
            Self::Deleted => 3,
        }
    }

    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Waiting,
            1 => Self::RequestSent,
            2 => Self::Ok,
            _ => Self::Deleted,
        }
    }
}

pub struct SecretChat {
    pub id: i32,
    pub access_hash: i64,
    state: Mutex<SecretChatState>,

    key: Mutex<[u8; 256]>,
    key_fingerprint: AtomicI64,
    /// Our private DH exponent, kept only while the handshake is open.
    private_exponent: Mutex<Option<Vec<u8>>>,

    pub admin_id: i32,
    pub participant_id: i32,
    layer: AtomicI32,
    ttl: AtomicI32,

    in_seq_no: AtomicI32,
    out_seq_no: AtomicI32,

    /// Inbound messages that arrived ahead of their turn, keyed by the
    /// sender's `out_seq_no`.
    reorder_buffer: Mutex<BTreeMap<i32, IncomingSecretMessage>>,
}

impl SecretChat {
    pub fn new(id: i32, access_hash: i64, admin_id: i32, participant_id: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            access_hash,
            state: Mutex::new(SecretChatState::Waiting),
            key: Mutex::new([0u8; 256]),
            key_fingerprint: AtomicI64::new(0),
            private_exponent: Mutex::new(None),
            admin_id,
            participant_id,
            layer: AtomicI32::new(8),
            ttl: AtomicI32::new(0),
            in_seq_no: AtomicI32::new(0),
            out_seq_no: AtomicI32::new(0),
            reorder_buffer: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn state(&self) -> SecretChatState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: SecretChatState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn key(&self) -> [u8; 256] {
        *self.key.lock().unwrap()
    }

    pub fn set_key(&self, key: [u8; 256]) {
        self.key_fingerprint.store(key_fingerprint(&key), Ordering::Relaxed);
        *self.key.lock().unwrap() = key;
    }

    pub fn key_fingerprint(&self) -> i64 {
        self.key_fingerprint.load(Ordering::Relaxed)
    }

    pub fn set_private_exponent(&self, a: Option<Vec<u8>>) {
        *self.private_exponent.lock().unwrap() = a;
    }

    pub fn take_private_exponent(&self) -> Option<Vec<u8>> {
        self.private_exponent.lock().unwrap().take()
    }

    pub fn layer(&self) -> i32 {
        self.layer.load(Ordering::Relaxed)
    }

    pub fn set_layer(&self, layer: i32) {
        self.layer.store(layer.clamp(8, SECRET_CHAT_MAX_LAYER), Ordering::Relaxed);
    }

    pub fn ttl(&self) -> i32 {
        self.ttl.load(Ordering::Relaxed)
    }

    pub fn set_ttl(&self, ttl: i32) {
        self.ttl.store(ttl, Ordering::Relaxed);
    }

    pub fn in_seq_no(&self) -> i32 {
        self.in_seq_no.load(Ordering::Relaxed)
    }

    pub fn out_seq_no(&self) -> i32 {
        self.out_seq_no.load(Ordering::Relaxed)
    }

    pub fn set_seq_nos(&self, in_seq_no: i32, out_seq_no: i32) {
        self.in_seq_no.store(in_seq_no, Ordering::Relaxed);
        self.out_seq_no.store(out_seq_no, Ordering::Relaxed);
    }

    /// A message was successfully serialized for sending.
    pub fn bump_out_seq_no(&self) {
        self.out_seq_no.fetch_add(1, Ordering::Relaxed);
    }

    fn we_are_admin(&self, our_id: i32) -> bool {
        self.admin_id == our_id
    }

    /// Wire form of the *peer's* next expected sequence number.
    pub fn raw_in_seq_no(&self, our_id: i32) -> i32 {
        2 * self.in_seq_no() + if self.we_are_admin(our_id) { 0 } else { 1 }
    }

    /// Wire form of our own next sequence number.
    pub fn raw_out_seq_no(&self, our_id: i32) -> i32 {
        2 * self.out_seq_no() + if self.we_are_admin(our_id) { 1 } else { 0 }
    }

    pub fn input_peer(&self) -> enums::InputEncryptedChat {
        enums::InputEncryptedChat { chat_id: self.id, access_hash: self.access_hash }
    }
}

impl Drop for SecretChat {
    fn drop(&mut self) {
        self.key.lock().unwrap().fill(0);
        if let Some(mut a) = self.private_exponent.lock().unwrap().take() {
            a.fill(0);
        }
    }
}

/// Low 64 bits of `SHA1(key)` — the fingerprint both sides compare after
/// the secret-chat DH completes.
pub fn key_fingerprint(key: &[u8; 256]) -> i64 {
    let digest = sha1!(key);
    i64::from_le_bytes(digest[12..20].try_into().unwrap())
}

// ─── Payload encryption ──────────────────────────────────────────────────────

/// Encrypt a plaintext layer blob into the wire `data:bytes` payload:
/// `key_fingerprint ‖ msg_key ‖ AES-IGE(len ‖ blob ‖ pad)`.
pub fn encrypt_payload(key: &[u8; 256], fingerprint: i64, blob: &[u8]) -> Vec<u8> {
    let mut plain = Vec::with_capacity(4 + blob.len());
    plain.extend((blob.len() as u32).to_le_bytes());
    plain.extend_from_slice(blob);

    let msg_key = crypto::calc_msg_key(&plain);

    let pad = (16 - plain.len() % 16) % 16;
    if pad > 0 {
        let mut rnd = [0u8; 16];
        getrandom::getrandom(&mut rnd).expect("system rng unavailable");
        plain.extend_from_slice(&rnd[..pad]);
    }

    let (aes_key, aes_iv) = crypto::calc_key(key, &msg_key, Side::Client);
    crypto::aes::ige_encrypt(&mut plain, &aes_key, &aes_iv);

    let mut out = Vec::with_capacity(24 + plain.len());
    out.extend(fingerprint.to_le_bytes());
    out.extend_from_slice(&msg_key);
    out.extend_from_slice(&plain);
    out
}

/// Errors from [`decrypt_payload`].
#[derive(Clone, Debug, PartialEq)]
pub enum SecretDecryptError {
    TooShort,
    FingerprintMismatch { got: i64 },
    MsgKeyMismatch,
    BadLength,
}

impl std::fmt::Display for SecretDecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "payload too short"),
            Self::FingerprintMismatch { got } => write!(f, "key fingerprint mismatch ({got:#x})"),
            Self::MsgKeyMismatch => write!(f, "msg_key mismatch"),
            Self::BadLength => write!(f, "declared length out of bounds"),
        }
    }
}

impl std::error::Error for SecretDecryptError {}

/// Reverse of [`encrypt_payload`].
pub fn decrypt_payload(
    key: &[u8; 256],
    expected_fingerprint: i64,
    payload: &[u8],
) -> Result<Vec<u8>, SecretDecryptError> {
    if payload.len() < 24 + 16 || (payload.len() - 24) % 16 != 0 {
        return Err(SecretDecryptError::TooShort);
    }
    let fingerprint = i64::from_le_bytes(payload[..8].try_into().unwrap());
    if fingerprint != expected_fingerprint {
        return Err(SecretDecryptError::FingerprintMismatch { got: fingerprint });
    }
    let msg_key: [u8; 16] = payload[8..24].try_into().unwrap();

    let mut plain = payload[24..].to_vec();
    let (aes_key, aes_iv) = crypto::calc_key(key, &msg_key, Side::Client);
    crypto::aes::ige_decrypt(&mut plain, &aes_key, &aes_iv);

    let len = u32::from_le_bytes(plain[..4].try_into().unwrap()) as usize;
    if len + 4 > plain.len() {
        return Err(SecretDecryptError::BadLength);
    }
    if crypto::calc_msg_key(&plain[..4 + len]) != msg_key {
        return Err(SecretDecryptError::MsgKeyMismatch);
    }
    Ok(plain[4..4 + len].to_vec())
}

// ─── Envelope construction ───────────────────────────────────────────────────

/// Parameters of one outbound envelope.
pub struct EnvelopeParams {
    pub layer: i32,
    pub raw_in_seq_no: i32,
    pub raw_out_seq_no: i32,
    pub random_id: i64,
    pub ttl: i32,
    pub text: String,
    /// Pre-serialized `DecryptedMessageMedia`, when the message carries one.
    pub media: Option<Vec<u8>>,
}

/// Length of the random filler string: 15 + 4·k for k ∈ 0..3.
fn random_filler_len() -> usize {
    let mut b = [0u8; 1];
    getrandom::getrandom(&mut b).expect("system rng unavailable");
    15 + 4 * (b[0] as usize % 3)
}

/// Compose the plaintext layer blob for one message. This is exactly what
/// the journal stores and what [`encrypt_payload`] seals.
pub fn build_envelope(params: &EnvelopeParams) -> Vec<u8> {
    let mut s = Serializer::new();
    let layer = params.layer;

    if layer >= 17 {
        s.out_u32(codes::DECRYPTED_MESSAGE_LAYER);
        s.out_random(random_filler_len());
        s.out_i32(layer);
        s.out_i32(params.raw_in_seq_no);
        s.out_i32(params.raw_out_seq_no);
    }

    if layer >= 46 {
        s.out_u32(codes::DECRYPTED_MESSAGE);
        let flags = if params.media.is_some() { codes::DECRYPTED_MESSAGE_MEDIA_FLAG } else { 0 };
        s.out_i32(flags);
        s.out_i64(params.random_id);
        s.out_i32(params.ttl);
        s.out_string(&params.text);
        if let Some(media) = &params.media {
            s.out_raw(media);
        }
    } else if layer >= 17 {
        s.out_u32(codes::DECRYPTED_MESSAGE_LAYER17);
        s.out_i64(params.random_id);
        s.out_i32(params.ttl);
        s.out_string(&params.text);
        match &params.media {
            Some(media) => s.out_raw(media),
            None => s.out_u32(codes::MEDIA_EMPTY),
        }
    } else {
        s.out_u32(codes::DECRYPTED_MESSAGE_LAYER8);
        s.out_i64(params.random_id);
        s.out_random(random_filler_len());
        s.out_string(&params.text);
        match &params.media {
            Some(media) => s.out_raw(media),
            None => s.out_u32(codes::MEDIA_EMPTY),
        }
    }

    s.into_bytes()
}

/// A service envelope (resend request, layer notification, TTL change).
pub fn build_service_envelope(
    layer: i32,
    raw_in_seq_no: i32,
    raw_out_seq_no: i32,
    random_id: i64,
    action: &ServiceAction,
) -> Vec<u8> {
    let mut s = Serializer::new();
    if layer >= 17 {
        s.out_u32(codes::DECRYPTED_MESSAGE_LAYER);
        s.out_random(random_filler_len());
        s.out_i32(layer);
        s.out_i32(raw_in_seq_no);
        s.out_i32(raw_out_seq_no);
        s.out_u32(codes::DECRYPTED_MESSAGE_SERVICE_LAYER17);
        s.out_i64(random_id);
    } else {
        s.out_u32(codes::DECRYPTED_MESSAGE_SERVICE_LAYER8);
        s.out_i64(random_id);
        s.out_random(random_filler_len());
    }
    match action {
        ServiceAction::Resend { start_seq_no, end_seq_no } => {
            s.out_u32(codes::ACTION_RESEND);
            s.out_i32(*start_seq_no);
            s.out_i32(*end_seq_no);
        }
        ServiceAction::NotifyLayer { layer } => {
            s.out_u32(codes::ACTION_NOTIFY_LAYER);
            s.out_i32(*layer);
        }
        ServiceAction::SetTtl { ttl } => {
            s.out_u32(codes::ACTION_SET_TTL);
            s.out_i32(*ttl);
        }
    }
    s.into_bytes()
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServiceAction {
    Resend { start_seq_no: i32, end_seq_no: i32 },
    NotifyLayer { layer: i32 },
    SetTtl { ttl: i32 },
}

// ─── Envelope parsing ────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct ParsedEnvelope {
    pub layer: i32,
    /// The sender's raw `out_seq_no`, or `None` below layer 17.
    pub raw_out_seq_no: Option<i32>,
    pub message: ParsedMessage,
}

#[derive(Clone, Debug)]
pub enum ParsedMessage {
    Text { random_id: i64, text: String, raw: Vec<u8> },
    Service { random_id: i64, action: Option<ServiceAction> },
    /// A media or unknown-variant message, kept raw for the application.
    Opaque { random_id: i64, raw: Vec<u8> },
}

/// Parse a decrypted layer blob.
pub fn parse_envelope(blob: &[u8]) -> Option<ParsedEnvelope> {
    let mut cursor = Cursor::from_slice(blob);
    let head = u32::deserialize(&mut cursor).ok()?;

    let (layer, raw_out, inner_id) = if head == codes::DECRYPTED_MESSAGE_LAYER {
        let _filler = Vec::<u8>::deserialize(&mut cursor).ok()?;
        let layer = i32::deserialize(&mut cursor).ok()?;
        let _raw_in = i32::deserialize(&mut cursor).ok()?;
        let raw_out = i32::deserialize(&mut cursor).ok()?;
        let inner = u32::deserialize(&mut cursor).ok()?;
        (layer, Some(raw_out), inner)
    } else {
        (8, None, head)
    };

    let message = match inner_id {
        codes::DECRYPTED_MESSAGE => {
            let flags = i32::deserialize(&mut cursor).ok()?;
            let random_id = i64::deserialize(&mut cursor).ok()?;
            let _ttl = i32::deserialize(&mut cursor).ok()?;
            let text = String::deserialize(&mut cursor).ok()?;
            if flags & codes::DECRYPTED_MESSAGE_MEDIA_FLAG != 0 {
                ParsedMessage::Opaque { random_id, raw: blob.to_vec() }
            } else {
                ParsedMessage::Text { random_id, text, raw: blob.to_vec() }
            }
        }
        codes::DECRYPTED_MESSAGE_LAYER17 => {
            let random_id = i64::deserialize(&mut cursor).ok()?;
            let _ttl = i32::deserialize(&mut cursor).ok()?;
            let text = String::deserialize(&mut cursor).ok()?;
            match u32::deserialize(&mut cursor) {
                Ok(codes::MEDIA_EMPTY) | Err(_) => {
                    ParsedMessage::Text { random_id, text, raw: blob.to_vec() }
                }
                Ok(_) => ParsedMessage::Opaque { random_id, raw: blob.to_vec() },
            }
        }
        codes::DECRYPTED_MESSAGE_LAYER8 => {
            let random_id = i64::deserialize(&mut cursor).ok()?;
            let _filler = Vec::<u8>::deserialize(&mut cursor).ok()?;
            let text = String::deserialize(&mut cursor).ok()?;
            match u32::deserialize(&mut cursor) {
                Ok(codes::MEDIA_EMPTY) | Err(_) => {
                    ParsedMessage::Text { random_id, text, raw: blob.to_vec() }
                }
                Ok(_) => ParsedMessage::Opaque { random_id, raw: blob.to_vec() },
            }
        }
        codes::DECRYPTED_MESSAGE_SERVICE_LAYER17 => {
            let random_id = i64::deserialize(&mut cursor).ok()?;
            ParsedMessage::Service { random_id, action: parse_action(&mut cursor) }
        }
        codes::DECRYPTED_MESSAGE_SERVICE_LAYER8 => {
            let random_id = i64::deserialize(&mut cursor).ok()?;
            let _filler = Vec::<u8>::deserialize(&mut cursor).ok()?;
            ParsedMessage::Service { random_id, action: parse_action(&mut cursor) }
        }
        _ => {
            let random_id = i64::deserialize(&mut cursor).unwrap_or(0);
            ParsedMessage::Opaque { random_id, raw: blob.to_vec() }
        }
    };

    Some(ParsedEnvelope { layer, raw_out_seq_no: raw_out, message })
}

fn parse_action(cursor: &mut Cursor) -> Option<ServiceAction> {
    match u32::deserialize(cursor).ok()? {
        codes::ACTION_RESEND => Some(ServiceAction::Resend {
            start_seq_no: i32::deserialize(cursor).ok()?,
            end_seq_no: i32::deserialize(cursor).ok()?,
        }),
        codes::ACTION_NOTIFY_LAYER => {
            Some(ServiceAction::NotifyLayer { layer: i32::deserialize(cursor).ok()? })
        }
        codes::ACTION_SET_TTL => Some(ServiceAction::SetTtl { ttl: i32::deserialize(cursor).ok()? }),
        _ => None,
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

impl UserAgent {
    /// Start a secret chat with `user`. The chat becomes usable when the
    /// peer accepts (an `Encryption` update with the established chat).
    pub fn request_secret_chat(&self, user_id: i32, access_hash: i64) {
        let request = courier_tl::functions::messages::GetDhConfig { version: 0, random_length: 256 };
        let query = Query::new(
            "get dh config",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(DhConfigHandler { target: DhTarget::Request { user_id, access_hash } }),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    /// React to an `updateEncryption` state change.
    pub(crate) fn handle_encryption_update(&self, chat: enums::EncryptedChat) {
        match chat {
            enums::EncryptedChat::Requested(data) => {
                log::info!("[secret] chat {} requested by {}", data.id, data.admin_id);
                let sc = SecretChat::new(data.id, data.access_hash, data.admin_id, data.participant_id);
                sc.set_state(SecretChatState::RequestSent);
                self.insert_secret_chat(sc);
                let request =
                    courier_tl::functions::messages::GetDhConfig { version: 0, random_length: 256 };
                let query = Query::new(
                    "get dh config",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(DhConfigHandler {
                        target: DhTarget::Accept { chat_id: data.id, g_a: data.key_material },
                    }),
                );
                let ua = self.clone();
                tokio::spawn(async move {
                    let dc = ua.working_dc();
                    ua.execute(query, dc, ExecOption::Default).await;
                });
            }
            enums::EncryptedChat::Chat(data) => {
                // the peer accepted our request: key = (g_b)^a mod p
                let Some(chat) = self.secret_chat(data.id) else { return };
                let Some(a) = chat.take_private_exponent() else {
                    log::warn!("[secret] chat {} established but no private exponent", data.id);
                    return;
                };
                let Some(p) = self.secret_dh_prime() else { return };
                let g_b = BigUint::from_bytes_be(&data.key_material);
                let key_int = g_b.modpow(&BigUint::from_bytes_be(&a), &p);
                let mut key = [0u8; 256];
                let bytes = key_int.to_bytes_be();
                key[256 - bytes.len()..].copy_from_slice(&bytes);
                chat.set_key(key);

                if chat.key_fingerprint() != data.key_fingerprint && data.key_fingerprint != 0 {
                    log::error!("[secret] chat {} fingerprint mismatch, discarding", data.id);
                    self.discard_secret_chat(data.id);
                    return;
                }
                chat.set_state(SecretChatState::Ok);
                self.sink().secret_chat_update(chat.id);
                self.notify_secret_layer(&chat);
                log::info!("[secret] chat {} established", data.id);
            }
            enums::EncryptedChat::Waiting(data) => {
                if let Some(chat) = self.secret_chat(data.id) {
                    chat.set_state(SecretChatState::Waiting);
                }
            }
            enums::EncryptedChat::Discarded { id } | enums::EncryptedChat::Empty { id } => {
                if let Some(chat) = self.secret_chat(id) {
                    chat.set_state(SecretChatState::Deleted);
                    let _ = self.journal_for(id).clear();
                    self.sink().secret_chat_update(id);
                }
            }
        }
    }

    /// Send a text message over an established secret chat.
    pub fn send_secret_message(&self, chat_id: i32, text: &str) {
        let Some(chat) = self.secret_chat(chat_id) else {
            log::warn!("[secret] unknown chat {chat_id}");
            return;
        };
        if chat.state() != SecretChatState::Ok {
            log::warn!("[secret] chat {chat_id} not established");
            return;
        }

        let random_id = random_i64();
        let our_id = self.our_id();
        let envelope = build_envelope(&EnvelopeParams {
            layer: chat.layer(),
            raw_in_seq_no: chat.raw_in_seq_no(our_id),
            raw_out_seq_no: chat.raw_out_seq_no(our_id),
            random_id,
            ttl: chat.ttl(),
            text: text.to_string(),
            media: None,
        });

        // journal first, then advance the counter, then encrypt
        let record = UnconfirmedMessage {
            message_id: random_id,
            constructor: CODE_SEND_ENCRYPTED,
            date: unix_now(),
            blobs: vec![envelope.clone()],
        };
        if let Err(e) = self.journal_for(chat_id).append(&record) {
            log::warn!("[secret] journal append failed for chat {chat_id}: {e}");
        }
        chat.out_seq_no.fetch_add(1, Ordering::Relaxed);

        self.send_secret_payload(&chat, random_id, &envelope, None);
    }

    /// Send an already-built envelope, optionally with a file tail.
    pub(crate) fn send_secret_payload(
        &self,
        chat: &Arc<SecretChat>,
        random_id: i64,
        envelope: &[u8],
        file: Option<enums::InputEncryptedFile>,
    ) {
        let data = encrypt_payload(&chat.key(), chat.key_fingerprint(), envelope);
        let handler = Box::new(SentEncryptedHandler { chat_id: chat.id, message_id: random_id });
        let query = match file {
            Some(file) => {
                let request = courier_tl::functions::messages::SendEncryptedFile {
                    peer: chat.input_peer(),
                    random_id,
                    data,
                    file,
                };
                Query::new("send encrypted file", request.to_bytes(), QueryPolicy::default(), handler)
            }
            None => {
                let request = courier_tl::functions::messages::SendEncrypted {
                    peer: chat.input_peer(),
                    random_id,
                    data,
                };
                Query::new("send encrypted", request.to_bytes(), QueryPolicy::default(), handler)
            }
        };
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    /// Replay the journal of every known secret chat. Called on start.
    pub(crate) fn replay_unconfirmed_messages(&self) {
        for chat in self.secret_chats_snapshot() {
            let records = match self.journal_for(chat.id).load() {
                Ok(records) => records,
                Err(e) => {
                    log::warn!("[secret] journal load failed for chat {}: {e}", chat.id);
                    continue;
                }
            };
            for record in records {
                log::info!(
                    "[secret] replaying unconfirmed message {} on chat {}",
                    record.message_id,
                    chat.id
                );
                self.replay_record(&chat, record);
            }
        }
    }

    fn replay_record(&self, chat: &Arc<SecretChat>, record: UnconfirmedMessage) {
        match record.constructor {
            CODE_SEND_ENCRYPTED if record.blobs.len() == 1 => {
                self.send_secret_payload(chat, record.message_id, &record.blobs[0], None);
            }
            CODE_SEND_ENCRYPTED_FILE if record.blobs.len() == 2 => {
                // blob 1 is the serialized InputEncryptedFile tail; splice
                // the query back together by hand
                let data =
                    encrypt_payload(&chat.key(), chat.key_fingerprint(), &record.blobs[0]);
                let mut s = Serializer::new();
                s.out_u32(CODE_SEND_ENCRYPTED_FILE);
                let mut peer_bytes = Vec::new();
                chat.input_peer().serialize(&mut peer_bytes);
                s.out_raw(&peer_bytes);
                s.out_i64(record.message_id);
                s.out_bytes(&data);
                s.out_raw(&record.blobs[1]);
                let query = Query::new(
                    "send encrypted file (replayed)",
                    s.into_bytes(),
                    QueryPolicy::default(),
                    Box::new(SentEncryptedHandler {
                        chat_id: chat.id,
                        message_id: record.message_id,
                    }),
                );
                let ua = self.clone();
                tokio::spawn(async move {
                    let dc = ua.working_dc();
                    ua.execute(query, dc, ExecOption::Default).await;
                });
            }
            other => {
                log::warn!("[secret] unrecognised journal record ({other:#x}), dropping");
                let _ = self.journal_for(chat.id).remove(record.message_id);
            }
        }
    }

    /// Inbound encrypted message from the updates stream or a difference.
    pub(crate) fn process_encrypted_message(&self, message: enums::EncryptedMessage) {
        let chat_id = message.chat_id();
        let Some(chat) = self.secret_chat(chat_id) else {
            log::debug!("[secret] message for unknown chat {chat_id}");
            return;
        };
        if chat.state() != SecretChatState::Ok {
            log::debug!("[secret] message for non-established chat {chat_id}");
            return;
        }

        let blob = match decrypt_payload(&chat.key(), chat.key_fingerprint(), message.bytes()) {
            Ok(blob) => blob,
            Err(e) => {
                log::warn!("[secret] chat {chat_id}: dropping undecryptable message: {e}");
                return;
            }
        };
        let Some(envelope) = parse_envelope(&blob) else {
            log::warn!("[secret] chat {chat_id}: unparsable envelope");
            return;
        };

        if envelope.layer > chat.layer() {
            chat.set_layer(envelope.layer);
        }

        let date = match &message {
            enums::EncryptedMessage::Message { date, .. }
            | enums::EncryptedMessage::Service { date, .. } => *date as i64,
        };

        match envelope.message {
            ParsedMessage::Service { random_id: _, action: Some(action) } => {
                self.handle_secret_action(&chat, action);
            }
            ParsedMessage::Service { .. } => {}
            ParsedMessage::Text { random_id, text, raw } => {
                self.deliver_ordered(&chat, envelope.raw_out_seq_no, IncomingSecretMessage {
                    chat_id,
                    random_id,
                    date,
                    out_seq_no: 0,
                    text: Some(text),
                    raw,
                });
            }
            ParsedMessage::Opaque { random_id, raw } => {
                self.deliver_ordered(&chat, envelope.raw_out_seq_no, IncomingSecretMessage {
                    chat_id,
                    random_id,
                    date,
                    out_seq_no: 0,
                    text: None,
                    raw,
                });
            }
        }
    }

    /// Enforce the sender-side ordering rule: messages reach the
    /// application in strictly increasing `out_seq_no` with no gaps.
    fn deliver_ordered(
        &self,
        chat: &Arc<SecretChat>,
        raw_out_seq_no: Option<i32>,
        mut message: IncomingSecretMessage,
    ) {
        let Some(raw_out) = raw_out_seq_no else {
            // pre-layer-17 chats have no sequence numbers; deliver as-is
            self.sink().new_secret_message(&message);
            return;
        };
        let seq = raw_out >> 1;
        message.out_seq_no = seq;

        let expected = chat.in_seq_no();
        if seq < expected {
            log::debug!("[secret] chat {}: duplicate seq {seq}", chat.id);
            return;
        }
        if seq > expected {
            log::warn!(
                "[secret] chat {}: hole before seq {seq} (expected {expected}), requesting resend",
                chat.id
            );
            chat.reorder_buffer.lock().unwrap().insert(seq, message);
            self.request_secret_resend(chat, expected, seq - 1);
            return;
        }

        self.sink().new_secret_message(&message);
        chat.in_seq_no.store(seq + 1, Ordering::Relaxed);

        // drain whatever became consecutive
        loop {
            let next = chat.in_seq_no();
            let Some(buffered) = chat.reorder_buffer.lock().unwrap().remove(&next) else {
                break;
            };
            self.sink().new_secret_message(&buffered);
            chat.in_seq_no.store(next + 1, Ordering::Relaxed);
        }
    }

    fn handle_secret_action(&self, chat: &Arc<SecretChat>, action: ServiceAction) {
        match action {
            ServiceAction::NotifyLayer { layer } => {
                log::info!("[secret] chat {} peer speaks layer {layer}", chat.id);
                chat.set_layer(layer);
            }
            ServiceAction::SetTtl { ttl } => {
                chat.set_ttl(ttl);
                self.sink().secret_chat_update(chat.id);
            }
            ServiceAction::Resend { start_seq_no, end_seq_no } => {
                log::info!(
                    "[secret] chat {} peer asks for resend {start_seq_no}..{end_seq_no}",
                    chat.id
                );
                // everything unconfirmed is still in the journal
                if let Ok(records) = self.journal_for(chat.id).load() {
                    for record in records {
                        self.replay_record(chat, record);
                    }
                }
            }
        }
    }

    fn request_secret_resend(&self, chat: &Arc<SecretChat>, from_seq: i32, to_seq: i32) {
        let our_id = self.our_id();
        let they_admin_bit = if chat.we_are_admin(our_id) { 0 } else { 1 };
        let envelope = build_service_envelope(
            chat.layer(),
            chat.raw_in_seq_no(our_id),
            chat.raw_out_seq_no(our_id),
            random_i64(),
            &ServiceAction::Resend {
                start_seq_no: 2 * from_seq + they_admin_bit,
                end_seq_no: 2 * to_seq + they_admin_bit,
            },
        );
        let data = encrypt_payload(&chat.key(), chat.key_fingerprint(), &envelope);
        let request = courier_tl::functions::messages::SendEncryptedService {
            peer: chat.input_peer(),
            random_id: random_i64(),
            data,
        };
        let query = Query::new(
            "send encrypted service",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(crate::query::DropHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    fn notify_secret_layer(&self, chat: &Arc<SecretChat>) {
        let our_id = self.our_id();
        let envelope = build_service_envelope(
            chat.layer(),
            chat.raw_in_seq_no(our_id),
            chat.raw_out_seq_no(our_id),
            random_i64(),
            &ServiceAction::NotifyLayer { layer: SECRET_CHAT_MAX_LAYER },
        );
        chat.out_seq_no.fetch_add(1, Ordering::Relaxed);
        let data = encrypt_payload(&chat.key(), chat.key_fingerprint(), &envelope);
        let request = courier_tl::functions::messages::SendEncryptedService {
            peer: chat.input_peer(),
            random_id: random_i64(),
            data,
        };
        let query = Query::new(
            "notify layer",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(crate::query::DropHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    /// Tear down a secret chat on both sides.
    pub fn discard_secret_chat(&self, chat_id: i32) {
        if let Some(chat) = self.secret_chat(chat_id) {
            chat.set_state(SecretChatState::Deleted);
        }
        let _ = self.journal_for(chat_id).clear();
        let request = courier_tl::functions::messages::DiscardEncryption { chat_id };
        let query = Query::new(
            "discard encryption",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(crate::query::DropHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }
}

fn random_i64() -> i64 {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("system rng unavailable");
    i64::from_le_bytes(b)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ─── DH / accept handlers ────────────────────────────────────────────────────

enum DhTarget {
    Request { user_id: i32, access_hash: i64 },
    Accept { chat_id: i32, g_a: Vec<u8> },
}

struct DhConfigHandler {
    target: DhTarget,
}

impl QueryHandler for DhConfigHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::messages::DhConfig;
        let (g, p_bytes) = match DhConfig::from_bytes(body) {
            Ok(DhConfig::Config { g, p, version: _, random: _ }) => (g, p),
            Ok(DhConfig::NotModified { .. }) => match ua.secret_dh_params() {
                Some((g, p)) => (g, p),
                None => {
                    log::warn!("[secret] dh config not modified but nothing cached");
                    return;
                }
            },
            Err(e) => {
                log::warn!("[secret] bad dh config: {e}");
                return;
            }
        };

        let p = BigUint::from_bytes_be(&p_bytes);
        if courier_crypto::dh::check_dh_params(&p, g).is_err() {
            log::error!("[secret] server sent unacceptable DH parameters");
            return;
        }
        ua.cache_secret_dh_params(g, p_bytes.clone());

        let mut exponent = [0u8; 256];
        getrandom::getrandom(&mut exponent).expect("system rng unavailable");
        let big_g = BigUint::from(g.max(0) as u32);
        let our_pub = big_g.modpow(&BigUint::from_bytes_be(&exponent), &p);

        match &self.target {
            DhTarget::Request { user_id, access_hash } => {
                let random_id = (random_i64() & 0x7fff_ffff) as i32;
                let request = courier_tl::functions::messages::RequestEncryption {
                    user_id: enums::InputUser::User { user_id: *user_id, access_hash: *access_hash },
                    random_id,
                    g_a: our_pub.to_bytes_be(),
                };
                let query = Query::new(
                    "request encryption",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(RequestEncryptionHandler { exponent: exponent.to_vec() }),
                );
                let ua = ua.clone();
                tokio::spawn(async move {
                    let dc = ua.working_dc();
                    ua.execute(query, dc, ExecOption::Default).await;
                });
            }
            DhTarget::Accept { chat_id, g_a } => {
                let Some(chat) = ua.secret_chat(*chat_id) else { return };
                let g_a_int = BigUint::from_bytes_be(g_a);
                if courier_crypto::dh::check_g_a(&p, &g_a_int).is_err() {
                    log::error!("[secret] chat {chat_id}: unacceptable g_a, discarding");
                    ua.discard_secret_chat(*chat_id);
                    return;
                }
                let key_int = g_a_int.modpow(&BigUint::from_bytes_be(&exponent), &p);
                let mut key = [0u8; 256];
                let bytes = key_int.to_bytes_be();
                key[256 - bytes.len()..].copy_from_slice(&bytes);
                chat.set_key(key);

                let request = courier_tl::functions::messages::AcceptEncryption {
                    peer: chat.input_peer(),
                    g_b: our_pub.to_bytes_be(),
                    key_fingerprint: chat.key_fingerprint(),
                };
                let query = Query::new(
                    "accept encryption",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(AcceptEncryptionHandler { chat_id: *chat_id }),
                );
                let ua = ua.clone();
                tokio::spawn(async move {
                    let dc = ua.working_dc();
                    ua.execute(query, dc, ExecOption::Default).await;
                });
            }
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[secret] getDhConfig failed: {code} {text}");
    }
}

struct RequestEncryptionHandler {
    exponent: Vec<u8>,
}

impl QueryHandler for RequestEncryptionHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        match enums::EncryptedChat::from_bytes(body) {
            Ok(enums::EncryptedChat::Waiting(data)) => {
                let chat =
                    SecretChat::new(data.id, data.access_hash, data.admin_id, data.participant_id);
                chat.set_state(SecretChatState::Waiting);
                chat.set_private_exponent(Some(self.exponent.clone()));
                ua.insert_secret_chat(chat);
                ua.sink().secret_chat_update(data.id);
                log::info!("[secret] chat {} waiting for peer accept", data.id);
            }
            Ok(other) => log::warn!("[secret] unexpected requestEncryption answer: {other:?}"),
            Err(e) => log::warn!("[secret] bad requestEncryption answer: {e}"),
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[secret] requestEncryption failed: {code} {text}");
    }
}

struct AcceptEncryptionHandler {
    chat_id: i32,
}

impl QueryHandler for AcceptEncryptionHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        match enums::EncryptedChat::from_bytes(body) {
            Ok(enums::EncryptedChat::Chat(_)) => {
                if let Some(chat) = ua.secret_chat(self.chat_id) {
                    chat.set_state(SecretChatState::Ok);
                    ua.sink().secret_chat_update(self.chat_id);
                    ua.notify_secret_layer(&chat);
                    log::info!("[secret] chat {} accepted", self.chat_id);
                }
            }
            Ok(other) => log::warn!("[secret] unexpected acceptEncryption answer: {other:?}"),
            Err(e) => log::warn!("[secret] bad acceptEncryption answer: {e}"),
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[secret] acceptEncryption failed: {code} {text}");
        ua.discard_secret_chat(self.chat_id);
    }
}

pub(crate) struct SentEncryptedHandler {
    pub chat_id: i32,
    pub message_id: i64,
}

impl QueryHandler for SentEncryptedHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::messages::SentEncryptedMessage;
        let date = SentEncryptedMessage::from_bytes(body).map(|m| m.date()).unwrap_or(0);
        if let Err(e) = ua.journal_for(self.chat_id).remove(self.message_id) {
            log::warn!("[secret] journal remove failed: {e}");
        }
        if let Some(chat) = ua.secret_chat(self.chat_id) {
            ua.sink().message_sent(self.message_id, date, chat.out_seq_no());
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        let error = crate::errors::RpcError::from_server(code, text);
        if error.is("ENCRYPTION_DECLINED") {
            log::warn!("[secret] chat {} declined by peer", self.chat_id);
            if let Some(chat) = ua.secret_chat(self.chat_id) {
                chat.set_state(SecretChatState::Deleted);
            }
            let _ = ua.journal_for(self.chat_id).clear();
            ua.sink().secret_chat_update(self.chat_id);
        } else {
            log::warn!(
                "[secret] send on chat {} failed: {code} {text} (kept in journal)",
                self.chat_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_key() -> [u8; 256] {
        let mut key = [0u8; 256];
        for (i, b) in key.iter_mut().enumerate() {
            *b = (i * 11 + 5) as u8;
        }
        key
    }

    #[test]
    fn fingerprint_is_low64_of_sha1() {
        let key = chat_key();
        let digest = sha1!(&key);
        assert_eq!(
            key_fingerprint(&key),
            i64::from_le_bytes(digest[12..20].try_into().unwrap())
        );
    }

    #[test]
    fn payload_round_trip() {
        let key = chat_key();
        let fp = key_fingerprint(&key);
        let blob = b"layered message contents".to_vec();

        let wire = encrypt_payload(&key, fp, &blob);
        assert_eq!(i64::from_le_bytes(wire[..8].try_into().unwrap()), fp);
        assert_eq!((wire.len() - 24) % 16, 0);

        let back = decrypt_payload(&key, fp, &wire).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn payload_rejects_wrong_fingerprint() {
        let key = chat_key();
        let fp = key_fingerprint(&key);
        let wire = encrypt_payload(&key, fp, b"x");
        assert!(matches!(
            decrypt_payload(&key, fp + 1, &wire),
            Err(SecretDecryptError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn envelope_round_trip_layer46() {
        let envelope = build_envelope(&EnvelopeParams {
            layer: 46,
            raw_in_seq_no: 4,
            raw_out_seq_no: 7,
            random_id: 1234,
            ttl: 0,
            text: "hello".into(),
            media: None,
        });
        let parsed = parse_envelope(&envelope).unwrap();
        assert_eq!(parsed.layer, 46);
        assert_eq!(parsed.raw_out_seq_no, Some(7));
        match parsed.message {
            ParsedMessage::Text { random_id, text, .. } => {
                assert_eq!(random_id, 1234);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn envelope_round_trip_layer8() {
        let envelope = build_envelope(&EnvelopeParams {
            layer: 8,
            raw_in_seq_no: 0,
            raw_out_seq_no: 0,
            random_id: -9,
            ttl: 0,
            text: "old school".into(),
            media: None,
        });
        let parsed = parse_envelope(&envelope).unwrap();
        assert_eq!(parsed.layer, 8);
        assert_eq!(parsed.raw_out_seq_no, None);
        match parsed.message {
            ParsedMessage::Text { random_id, text, .. } => {
                assert_eq!(random_id, -9);
                assert_eq!(text, "old school");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn service_envelope_parses_resend() {
        let envelope = build_service_envelope(
            46,
            3,
            5,
            42,
            &ServiceAction::Resend { start_seq_no: 4, end_seq_no: 6 },
        );
        let parsed = parse_envelope(&envelope).unwrap();
        match parsed.message {
            ParsedMessage::Service { action: Some(ServiceAction::Resend { start_seq_no, end_seq_no }), .. } => {
                assert_eq!((start_seq_no, end_seq_no), (4, 6));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    struct SeqRecorder(Mutex<Vec<i32>>);

    impl crate::EventSink for SeqRecorder {
        fn new_secret_message(&self, message: &IncomingSecretMessage) {
            self.0.lock().unwrap().push(message.out_seq_no);
        }
    }

    #[tokio::test]
    async fn out_of_order_messages_are_delivered_in_sequence() {
        let recorder = Arc::new(SeqRecorder(Mutex::new(Vec::new())));
        let ua = crate::UserAgent::new(crate::Config {
            sink: recorder.clone(),
            state_backend: Arc::new(crate::InMemoryBackend::new()),
            connection_factory: crate::LoopbackFactory::new(),
            ..crate::Config::default()
        });

        let chat = SecretChat::new(7, 0, 100, 200);
        chat.set_key(chat_key());
        chat.set_state(SecretChatState::Ok);
        chat.set_layer(46);
        chat.set_seq_nos(2, 0); // next expected peer seq is 2
        ua.insert_secret_chat(chat.clone());

        let wire_message = |seq: i32| {
            let envelope = build_envelope(&EnvelopeParams {
                layer: 46,
                raw_in_seq_no: 0,
                raw_out_seq_no: 2 * seq + 1,
                random_id: seq as i64,
                ttl: 0,
                text: format!("m{seq}"),
                media: None,
            });
            enums::EncryptedMessage::Service {
                random_id: seq as i64,
                chat_id: 7,
                date: 0,
                bytes: encrypt_payload(&chat.key(), chat.key_fingerprint(), &envelope),
            }
        };

        // seq 3 arrives first on the wire, then seq 2
        ua.process_encrypted_message(wire_message(3));
        assert!(recorder.0.lock().unwrap().is_empty(), "gap must hold delivery back");

        ua.process_encrypted_message(wire_message(2));
        assert_eq!(*recorder.0.lock().unwrap(), vec![2, 3]);
        assert_eq!(chat.in_seq_no(), 4);
    }

    #[test]
    fn raw_seq_numbers_follow_admin_parity() {
        let chat = SecretChat::new(5, 0, 100, 200);
        chat.set_seq_nos(3, 4);
        // we are the admin (our_id == 100)
        assert_eq!(chat.raw_in_seq_no(100), 6);
        assert_eq!(chat.raw_out_seq_no(100), 9);
        // we are the participant
        assert_eq!(chat.raw_in_seq_no(200), 7);
        assert_eq!(chat.raw_out_seq_no(200), 8);
    }
}
