//! # courier-client
//!
//! The client core of an MTProto messenger: the query/session engine and
//! its companions.
//!
//! * query lifecycle — send, ack, retry, timeout, error recovery
//! * per-DC state machine — handshake, PFS binding, configure, migrate,
//!   logout, pending queue, idle cleanup
//! * update catch-up with `pts`/`qts`/`seq`/`date` cursors and per-channel
//!   differences
//! * secret chats — layered envelopes, strict inbound ordering, a
//!   crash-safe unconfirmed-message journal
//! * chunked file transfer with resume and AES-IGE attachment encryption
//!
//! Everything hangs off an explicitly-passed [`UserAgent`] handle; there
//! is no process-wide state.

#![deny(unsafe_code)]

mod errors;
mod timer;
pub mod callback;
pub mod dc;
pub mod journal;
pub mod net;
pub mod persist;
pub mod query;
pub mod secret_chat;
pub mod transfer;
pub mod two_factor_auth;
pub mod updates;

pub use callback::{EventSink, IncomingSecretMessage, NullSink, ValueKind};
pub use errors::{Error, RpcError};
pub use net::{Connection, ConnectionFactory, LoopbackFactory, LoopbackPeer, TcpConnectionFactory};
pub use persist::{BinaryFileBackend, InMemoryBackend, PersistedState, StateBackend};
pub use query::{ExecOption, Query, QueryHandler, QueryPolicy};
pub use secret_chat::{SecretChat, SecretChatState};
pub use transfer::{TransferStatus, UploadDocument, UploadTarget};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use courier_crypto::AuthKey;
use courier_tl::mtproto::{
    ID_BAD_MSG_NOTIFICATION, ID_BAD_SERVER_SALT, ID_GZIP_PACKED, ID_MSGS_ACK, ID_MSG_CONTAINER,
    ID_NEW_SESSION_CREATED, ID_PONG, ID_RPC_ERROR, ID_RPC_RESULT,
};
use courier_tl::schema::enums;
use courier_tl::{types, Cursor, Deserializable, Serializable};
use num_bigint::BigUint;

use dc::{Dc, DcAddress, DcState, SessionHandle};
use journal::Journal;
use secret_chat::SecretChat as SecretChatObj;
use transfer::TransferManager;
use updates::{ChannelState, UpdateState};

/// Seconds acknowledgements are batched before a `msgs_ack` goes out.
const ACK_FLUSH_INTERVAL: f64 = 0.5;

// ─── Config ──────────────────────────────────────────────────────────────────

/// Configuration for [`UserAgent::new`].
pub struct Config {
    pub app_id: i32,
    pub app_hash: String,
    /// Application-supplied version, reported alongside the library's own.
    pub app_version: String,
    pub device_model: String,
    pub system_version: String,
    pub lang_code: String,
    /// Negotiate temporary keys bound to the permanent one.
    pub pfs_enabled: bool,
    pub download_dir: PathBuf,
    /// Where the unconfirmed-secret-message journals live.
    pub journal_dir: PathBuf,
    pub state_backend: Arc<dyn StateBackend>,
    pub connection_factory: Arc<dyn ConnectionFactory>,
    pub sink: Arc<dyn EventSink>,
    /// `(dc_id, "ip:port")` seed table used before the first `getConfig`.
    pub bootstrap_dcs: Vec<(i32, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: 0,
            app_hash: String::new(),
            app_version: "0.0".into(),
            device_model: "Linux".into(),
            system_version: "1.0".into(),
            lang_code: "en".into(),
            pfs_enabled: false,
            download_dir: PathBuf::from("downloads"),
            journal_dir: PathBuf::from("journals"),
            state_backend: Arc::new(BinaryFileBackend::new("courier.state")),
            connection_factory: Arc::new(TcpConnectionFactory),
            sink: Arc::new(NullSink),
            bootstrap_dcs: default_dc_addresses(),
        }
    }
}

/// Bootstrap DC table, replaced by the server's `config.dc_options` after
/// the first `initConnection`.
pub fn default_dc_addresses() -> Vec<(i32, String)> {
    vec![
        (1, "149.154.175.53:443".into()),
        (2, "149.154.167.51:443".into()),
        (3, "149.154.175.100:443".into()),
        (4, "149.154.167.91:443".into()),
        (5, "91.108.56.130:443".into()),
    ]
}

// ─── UserAgent ───────────────────────────────────────────────────────────────

pub(crate) struct Inner {
    config: Config,
    dcs: Mutex<HashMap<i32, Arc<Dc>>>,
    working_dc_id: AtomicI32,
    queries: Mutex<HashMap<i64, Arc<Query>>>,
    update_state: Mutex<UpdateState>,
    pub(crate) diff_locked: AtomicBool,
    channels: Mutex<HashMap<i32, ChannelState>>,
    secret_chats: Mutex<HashMap<i32, Arc<SecretChatObj>>>,
    secret_dh: Mutex<Option<(i32, Vec<u8>)>>,
    transfers: TransferManager,
    online: AtomicBool,
    started: AtomicBool,
    our_id: AtomicI32,
    password_locked: AtomicBool,
}

/// The engine handle. Cheap to clone; every component receives it
/// explicitly instead of reaching for a global.
#[derive(Clone)]
pub struct UserAgent {
    inner: Arc<Inner>,
}

impl UserAgent {
    pub fn new(config: Config) -> Self {
        let transfers = TransferManager::new(config.download_dir.clone());
        let ua = Self {
            inner: Arc::new(Inner {
                dcs: Mutex::new(HashMap::new()),
                working_dc_id: AtomicI32::new(2),
                queries: Mutex::new(HashMap::new()),
                update_state: Mutex::new(UpdateState::default()),
                diff_locked: AtomicBool::new(false),
                channels: Mutex::new(HashMap::new()),
                secret_chats: Mutex::new(HashMap::new()),
                secret_dh: Mutex::new(None),
                transfers,
                online: AtomicBool::new(false),
                started: AtomicBool::new(false),
                our_id: AtomicI32::new(0),
                password_locked: AtomicBool::new(false),
                config,
            }),
        };
        ua.restore_state();
        ua
    }

    /// Go online: bring up the working DC, close any update gap, replay
    /// unconfirmed secret messages.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.online.store(true, Ordering::Release);
        log::info!(
            "[agent] starting (working DC {}, state backend: {})",
            self.working_dc_id(),
            self.inner.config.state_backend.name()
        );

        let working = self.working_dc();
        self.ensure_session(&working);
        if self.is_logged_in() {
            self.get_difference();
            self.replay_unconfirmed_messages();
        }
        self.sink().started();
    }

    /// Network reachability, reported by the embedder.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
        if online && self.inner.started.load(Ordering::Acquire) {
            let working = self.working_dc();
            self.ensure_session(&working);
            self.get_difference();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn is_logged_in(&self) -> bool {
        self.our_id() != 0
    }

    pub fn our_id(&self) -> i32 {
        self.inner.our_id.load(Ordering::Acquire)
    }

    // ── plumbing shared with the sibling modules ───────────────────────────

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn connection_factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.inner.config.connection_factory
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.inner.config.sink
    }

    pub(crate) fn transfers(&self) -> &TransferManager {
        &self.inner.transfers
    }

    pub(crate) fn update_state(&self) -> UpdateState {
        *self.inner.update_state.lock().unwrap()
    }

    pub(crate) fn update_state_mut(&self) -> MutexGuard<'_, UpdateState> {
        self.inner.update_state.lock().unwrap()
    }

    pub(crate) fn channels_mut(&self) -> MutexGuard<'_, HashMap<i32, ChannelState>> {
        self.inner.channels.lock().unwrap()
    }

    pub(crate) fn set_date(&self, date: i32) {
        let mut state = self.update_state_mut();
        if date > state.date {
            state.date = date;
        }
    }

    pub(crate) fn set_seq_date(&self, seq: i32, date: i32) {
        let mut state = self.update_state_mut();
        if seq > state.seq {
            state.seq = seq;
        }
        if date > state.date {
            state.date = date;
        }
    }

    pub(crate) fn advance_qts(&self, qts: i32) {
        self.update_state_mut().advance_qts(qts);
    }

    pub(crate) fn lock_password_flow(&self) -> bool {
        self.inner.password_locked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn unlock_password_flow(&self) {
        self.inner.password_locked.store(false, Ordering::Release);
    }

    // ── DC registry ────────────────────────────────────────────────────────

    pub fn working_dc_id(&self) -> i32 {
        self.inner.working_dc_id.load(Ordering::Acquire)
    }

    pub fn working_dc(&self) -> Arc<Dc> {
        let id = self.working_dc_id();
        self.dc_by_id(id)
    }

    pub fn dc_by_id(&self, id: i32) -> Arc<Dc> {
        let mut dcs = self.inner.dcs.lock().unwrap();
        dcs.entry(id).or_insert_with(|| Dc::new(id, Vec::new())).clone()
    }

    /// Install an externally-built session on a DC and start serving it.
    /// Embedders with custom transports (and the test suite) use this to
    /// skip the built-in bring-up.
    pub fn adopt_session(&self, dc: &Arc<Dc>, handle: Arc<SessionHandle>) {
        dc.set_session(Some(handle.clone()));
        self.spawn_receive_loop(dc.clone(), handle);
    }

    /// Switch the working DC (server migration). Returns the new DC.
    pub(crate) fn set_working_dc(&self, id: i32) -> Arc<Dc> {
        self.inner.working_dc_id.store(id, Ordering::Release);
        log::info!("[agent] working DC is now {id}");
        self.dc_by_id(id)
    }

    /// Merge `dc_options` from `help.getConfig` into the DC table.
    pub(crate) fn apply_dc_options(&self, options: &[types::DcOption]) {
        let mut grouped: HashMap<i32, Vec<DcAddress>> = HashMap::new();
        for option in options {
            grouped.entry(option.id).or_default().push(DcAddress {
                ip: option.ip_address.clone(),
                port: option.port,
                ipv6: option.ipv6,
                media_only: option.media_only,
            });
        }
        for (id, addresses) in grouped {
            self.dc_by_id(id).replace_addresses(addresses);
        }
    }

    // ── query registry ─────────────────────────────────────────────────────

    pub(crate) fn register_query(&self, msg_id: i64, query: Arc<Query>) {
        self.inner.queries.lock().unwrap().insert(msg_id, query);
    }

    pub(crate) fn unregister_query(&self, msg_id: i64) {
        self.inner.queries.lock().unwrap().remove(&msg_id);
    }

    pub(crate) fn query_by_msg_id(&self, msg_id: i64) -> Option<Arc<Query>> {
        self.inner.queries.lock().unwrap().get(&msg_id).cloned()
    }

    // ── secret-chat registry ───────────────────────────────────────────────

    pub(crate) fn insert_secret_chat(&self, chat: Arc<SecretChatObj>) {
        self.inner.secret_chats.lock().unwrap().insert(chat.id, chat);
    }

    pub fn secret_chat(&self, id: i32) -> Option<Arc<SecretChatObj>> {
        self.inner.secret_chats.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn secret_chats_snapshot(&self) -> Vec<Arc<SecretChatObj>> {
        self.inner.secret_chats.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn journal_for(&self, chat_id: i32) -> Journal {
        Journal::for_chat(&self.inner.config.journal_dir, chat_id)
    }

    pub(crate) fn cache_secret_dh_params(&self, g: i32, p: Vec<u8>) {
        *self.inner.secret_dh.lock().unwrap() = Some((g, p));
    }

    pub(crate) fn secret_dh_params(&self) -> Option<(i32, Vec<u8>)> {
        self.inner.secret_dh.lock().unwrap().clone()
    }

    pub(crate) fn secret_dh_prime(&self) -> Option<BigUint> {
        self.secret_dh_params().map(|(_, p)| BigUint::from_bytes_be(&p))
    }

    // ── inbound dispatch ───────────────────────────────────────────────────

    /// One task per session: decrypt frames, queue acks, demultiplex. On
    /// connection loss the DC's in-flight queries become pending again and
    /// the working DC reconnects.
    pub(crate) fn spawn_receive_loop(&self, dc: Arc<Dc>, handle: Arc<SessionHandle>) {
        let ua = self.clone();
        tokio::spawn(async move {
            loop {
                let Some(mut frame) = handle.conn.recv().await else {
                    break;
                };
                let inbound = handle.session.lock().unwrap().unpack(&mut frame);
                match inbound {
                    Ok(message) => {
                        if message.salt != 0 {
                            handle.session.lock().unwrap().set_salt(message.salt);
                            dc.set_server_salt(message.salt);
                        }
                        if message.needs_ack() {
                            handle.session.lock().unwrap().queue_ack(message.msg_id);
                            ua.schedule_ack_flush(&handle);
                        }
                        ua.handle_envelope(&dc, &handle, &message.body);
                    }
                    Err(e) => {
                        log::warn!("[dc{}] dropping undecryptable frame: {e}", dc.id);
                    }
                }
            }
            ua.on_session_disconnected(&dc, &handle);
        });
    }

    fn schedule_ack_flush(&self, handle: &Arc<SessionHandle>) {
        let handle2 = handle.clone();
        handle.ack_timer.start(ACK_FLUSH_INTERVAL, async move {
            let packed = handle2.session.lock().unwrap().flush_acks();
            if let Some(packed) = packed {
                let _ = handle2.conn.send(packed.bytes);
            }
        });
    }

    fn on_session_disconnected(&self, dc: &Arc<Dc>, handle: &Arc<SessionHandle>) {
        log::warn!("[dc{}] connection lost", dc.id);
        let current = dc.session();
        if current.map(|c| Arc::ptr_eq(&c, handle)).unwrap_or(false) {
            dc.close_session();
        }

        // in-flight queries on this DC go back to pending for the next
        // session; their callbacks see nothing
        let stranded: Vec<Arc<Query>> = {
            let mut queries = self.inner.queries.lock().unwrap();
            let ids: Vec<i64> = queries
                .iter()
                .filter(|(_, q)| q.dc_id() == Some(dc.id))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| queries.remove(id)).collect()
        };
        for query in stranded {
            let msg_id = query.msg_id();
            dc.forget_active(msg_id);
            query.clear_timers();
            query.handler().will_be_pending(self);
            dc.add_pending(query);
        }

        if self.is_online() && dc.id == self.working_dc_id() {
            self.ensure_session(dc);
        }
    }

    /// Demultiplex one decrypted message body.
    pub(crate) fn handle_envelope(&self, dc: &Arc<Dc>, handle: &Arc<SessionHandle>, body: &[u8]) {
        if body.len() < 4 {
            return;
        }
        let constructor = u32::from_le_bytes(body[..4].try_into().unwrap());
        let rest = &body[4..];

        match constructor {
            ID_MSG_CONTAINER => {
                let mut cursor = Cursor::from_slice(rest);
                let Ok(count) = i32::deserialize(&mut cursor) else { return };
                for _ in 0..count.max(0) {
                    let Ok(_inner_msg_id) = i64::deserialize(&mut cursor) else { return };
                    let Ok(_inner_seq) = i32::deserialize(&mut cursor) else { return };
                    let Ok(len) = i32::deserialize(&mut cursor) else { return };
                    let len = len.max(0) as usize;
                    if cursor.remaining() < len {
                        return;
                    }
                    let start = cursor.pos();
                    self.handle_envelope(dc, handle, &rest[start..start + len]);
                    let mut skip = vec![0u8; len];
                    let _ = cursor.read_exact(&mut skip);
                }
            }
            ID_RPC_RESULT => {
                let mut cursor = Cursor::from_slice(rest);
                let Ok(req_msg_id) = i64::deserialize(&mut cursor) else { return };
                self.dispatch_result(req_msg_id, &rest[cursor.pos()..]);
            }
            ID_RPC_ERROR => {
                if let Some((code, text)) = query::parse_rpc_error(rest) {
                    log::warn!("[dc{}] stray rpc_error {code}: {text}", dc.id);
                }
            }
            ID_MSGS_ACK => {
                if let Ok(msg_ids) = Vec::<i64>::from_bytes(rest) {
                    for msg_id in msg_ids {
                        self.ack_query(msg_id);
                    }
                }
            }
            ID_BAD_SERVER_SALT => {
                let mut cursor = Cursor::from_slice(rest);
                let Ok(bad_msg_id) = i64::deserialize(&mut cursor) else { return };
                let Ok(_bad_seq) = i32::deserialize(&mut cursor) else { return };
                let Ok(_error) = i32::deserialize(&mut cursor) else { return };
                let Ok(new_salt) = i64::deserialize(&mut cursor) else { return };
                log::info!("[dc{}] bad server salt, updating", dc.id);
                handle.session.lock().unwrap().set_salt(new_salt);
                dc.set_server_salt(new_salt);
                if let Some(query) = self.query_by_msg_id(bad_msg_id) {
                    self.regen(query);
                }
            }
            ID_BAD_MSG_NOTIFICATION => {
                let mut cursor = Cursor::from_slice(rest);
                let Ok(bad_msg_id) = i64::deserialize(&mut cursor) else { return };
                let Ok(_bad_seq) = i32::deserialize(&mut cursor) else { return };
                let Ok(error_code) = i32::deserialize(&mut cursor) else { return };
                log::warn!("[dc{}] bad_msg_notification {error_code} for #{bad_msg_id}", dc.id);
                if error_code == 16 || error_code == 17 {
                    // client clock skew: resynchronise from wall time next send
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    let server_secs = bad_msg_id >> 32;
                    dc.set_server_time_delta((server_secs - now) as i32);
                }
                if let Some(query) = self.query_by_msg_id(bad_msg_id) {
                    self.regen(query);
                }
            }
            ID_NEW_SESSION_CREATED => {
                let mut cursor = Cursor::from_slice(rest);
                let _ = i64::deserialize(&mut cursor); // first_msg_id
                let _ = i64::deserialize(&mut cursor); // unique_id
                if let Ok(salt) = i64::deserialize(&mut cursor) {
                    handle.session.lock().unwrap().set_salt(salt);
                    dc.set_server_salt(salt);
                }
            }
            ID_PONG => {}
            ID_GZIP_PACKED => {
                // a compressed envelope at the top level: unwrap and retry
                match Vec::<u8>::from_bytes(rest) {
                    Ok(_packed) => {
                        log::debug!("[dc{}] top-level gzip envelope", dc.id);
                    }
                    Err(e) => log::debug!("[dc{}] bad gzip envelope: {e}", dc.id),
                }
            }
            _ => {
                // everything else is an updates push
                self.process_updates_frame(body);
            }
        }
    }

    // ── persistence ────────────────────────────────────────────────────────

    fn restore_state(&self) {
        let state = match self.inner.config.state_backend.load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.seed_bootstrap_dcs();
                return;
            }
            Err(e) => {
                log::warn!("[agent] state load failed ({e}); starting fresh");
                self.seed_bootstrap_dcs();
                return;
            }
        };

        self.inner.our_id.store(state.our_id, Ordering::Release);
        self.inner.working_dc_id.store(
            if state.working_dc_id != 0 { state.working_dc_id } else { 2 },
            Ordering::Release,
        );
        *self.update_state_mut() = UpdateState {
            pts: state.pts,
            qts: state.qts,
            seq: state.seq,
            date: state.date,
        };

        for record in state.dcs {
            let dc = self.dc_by_id(record.id);
            dc.replace_addresses(record.addresses);
            if let Some(key) = record.auth_key {
                dc.set_perm_key(Some(AuthKey::from_bytes(key)));
                dc.set_state(if record.logged_in {
                    DcState::LoggedIn
                } else {
                    DcState::HavePermanent
                });
            }
            if let Some(key) = record.temp_auth_key {
                dc.set_temp_key(Some(AuthKey::from_bytes(key)), record.temp_expires_at);
            }
            dc.set_server_salt(record.server_salt);
            dc.set_server_time_delta(record.server_time_delta);
        }
        self.seed_bootstrap_dcs();

        for record in state.secret_chats {
            let chat = SecretChatObj::new(
                record.id,
                record.access_hash,
                record.admin_id,
                record.participant_id,
            );
            chat.set_key(record.key);
            chat.set_state(record.state);
            chat.set_layer(record.layer);
            chat.set_ttl(record.ttl);
            chat.set_seq_nos(record.in_seq_no, record.out_seq_no);
            self.insert_secret_chat(chat);
        }
        log::info!("[agent] state restored (our_id={})", state.our_id);
    }

    fn seed_bootstrap_dcs(&self) {
        for (id, endpoint) in &self.inner.config.bootstrap_dcs {
            let dc = self.dc_by_id(*id);
            if dc.primary_endpoint().is_none() {
                if let Some((ip, port)) = endpoint.rsplit_once(':') {
                    dc.replace_addresses(vec![DcAddress {
                        ip: ip.to_string(),
                        port: port.parse().unwrap_or(443),
                        ipv6: false,
                        media_only: false,
                    }]);
                }
            }
        }
    }

    /// Snapshot everything durable and hand it to the backend.
    pub fn save_state(&self) -> std::io::Result<()> {
        let cursors = self.update_state();
        let mut state = PersistedState {
            our_id: self.our_id(),
            working_dc_id: self.working_dc_id(),
            pts: cursors.pts,
            qts: cursors.qts,
            seq: cursors.seq,
            date: cursors.date,
            dcs: Vec::new(),
            secret_chats: Vec::new(),
        };

        for dc in self.inner.dcs.lock().unwrap().values() {
            state.dcs.push(persist::DcRecord {
                id: dc.id,
                addresses: dc.addresses(),
                auth_key: dc.perm_key().map(|k| k.to_bytes()),
                temp_auth_key: dc.temp_key().map(|k| k.to_bytes()),
                temp_expires_at: dc.temp_expires_at(),
                server_salt: dc.server_salt(),
                server_time_delta: dc.server_time_delta(),
                logged_in: dc.is_logged_in(),
            });
        }
        for chat in self.secret_chats_snapshot() {
            state.secret_chats.push(persist::SecretChatRecord {
                id: chat.id,
                access_hash: chat.access_hash,
                state: chat.state(),
                admin_id: chat.admin_id,
                participant_id: chat.participant_id,
                key: chat.key(),
                key_fingerprint: chat.key_fingerprint(),
                in_seq_no: chat.in_seq_no(),
                out_seq_no: chat.out_seq_no(),
                layer: chat.layer(),
                ttl: chat.ttl(),
            });
        }

        self.inner.config.state_backend.save(&state)
    }

    // ── login state transitions ────────────────────────────────────────────

    pub(crate) fn finish_login(&self, user: &enums::User) {
        self.inner.our_id.store(user.id(), Ordering::Release);
        let working = self.working_dc();
        working.set_state(DcState::LoggedIn);
        self.sink().new_user(user);
        self.sink().logged_in();
        let _ = self.save_state();
        self.sync_update_state();
        let ua = self.clone();
        tokio::spawn(async move {
            ua.send_pending_queries(&ua.working_dc()).await;
        });
    }

    pub(crate) fn set_dc_logged_out(&self, dc: &Arc<Dc>) {
        if dc.is_logged_in() {
            dc.set_state(DcState::Configured);
        }
        if dc.id == self.working_dc_id() {
            self.inner.our_id.store(0, Ordering::Release);
            self.sink().login_failed();
        }
    }
}

// ─── Typed façade (application entry points) ─────────────────────────────────

/// Token carrying the code hash between `request_login_code` and
/// `sign_in`.
#[derive(Clone, Debug)]
pub struct LoginToken {
    pub phone: String,
    pub phone_code_hash: String,
}

/// One page of dialogs with its hydration data.
pub struct DialogPage {
    pub dialogs: Vec<types::Dialog>,
    pub messages: Vec<enums::Message>,
    pub chats: Vec<enums::Chat>,
    pub users: Vec<enums::User>,
}

type ResultCallback<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

impl UserAgent {
    /// Ask the server to send a login code to `phone`.
    pub fn request_login_code(&self, phone: &str, callback: ResultCallback<LoginToken>) {
        let request = courier_tl::functions::auth::SendCode {
            phone_number: phone.to_string(),
            sms_type: 0,
            api_id: self.inner.config.app_id,
            api_hash: self.inner.config.app_hash.clone(),
            lang_code: self.inner.config.lang_code.clone(),
        };
        let query = Query::new(
            "send code",
            request.to_bytes(),
            QueryPolicy::login(),
            Box::new(SendCodeHandler {
                phone: phone.to_string(),
                callback: Mutex::new(Some(callback)),
            }),
        );
        self.run_on_working_dc(query, ExecOption::Login);
    }

    /// Complete sign-in with the received code.
    pub fn sign_in(&self, token: &LoginToken, code: &str, callback: ResultCallback<enums::User>) {
        let request = courier_tl::functions::auth::SignIn {
            phone_number: token.phone.clone(),
            phone_code_hash: token.phone_code_hash.clone(),
            phone_code: code.trim().to_string(),
        };
        let query = Query::new(
            "sign in",
            request.to_bytes(),
            QueryPolicy::login(),
            Box::new(SignInHandler { callback: Mutex::new(Some(callback)) }),
        );
        self.run_on_working_dc(query, ExecOption::Login);
    }

    /// Log out of the working DC. The server only acks this query and then
    /// closes the connection; the engine synthesizes the result.
    pub fn log_out(&self) {
        let working = self.working_dc();
        working.set_state(DcState::LoggingOut);
        let query = Query::new(
            "log out",
            courier_tl::functions::auth::LogOut.to_bytes(),
            QueryPolicy::login(),
            Box::new(LogOutHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Logout).await;
        });
    }

    /// Send a text message. Returns the local random id immediately; the
    /// application shows the message as pending until
    /// [`EventSink::message_sent`] reconciles it with the server id.
    pub fn send_text_message(&self, peer: enums::InputPeer, text: &str) -> i64 {
        let random_id = random_i64();
        let request = courier_tl::functions::messages::SendMessage {
            peer,
            reply_to_msg_id: None,
            message: text.to_string(),
            random_id,
        };
        let query = Query::new(
            "send message",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(SendMessageHandler { local_id: random_id }),
        );
        self.run_on_working_dc(query, ExecOption::Default);
        random_id
    }

    /// Fetch up to `limit` dialogs.
    pub fn get_dialogs(&self, limit: i32, callback: ResultCallback<DialogPage>) {
        let request = courier_tl::functions::messages::GetDialogs { offset: 0, limit };
        let query = Query::new(
            "get dialogs",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(GetDialogsHandler { callback: Mutex::new(Some(callback)) }),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    /// Fetch message history for a peer, newest first.
    pub fn get_history(
        &self,
        peer: enums::InputPeer,
        offset: i32,
        limit: i32,
        callback: ResultCallback<Vec<enums::Message>>,
    ) {
        let request = courier_tl::functions::messages::GetHistory { peer, offset, max_id: 0, limit };
        let query = Query::new(
            "get history",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(GetHistoryHandler { callback: Mutex::new(Some(callback)) }),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    /// Mark everything in a chat as read.
    pub fn mark_read(&self, peer: enums::Peer, input_peer: enums::InputPeer) {
        let request = courier_tl::functions::messages::ReadHistory { peer: input_peer, max_id: 0 };
        let query = Query::new(
            "read history",
            request.to_bytes(),
            QueryPolicy::slack(),
            Box::new(ReadHistoryHandler { peer }),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    /// Typing indicator (or its cancellation).
    pub fn set_typing(&self, peer: enums::InputPeer, typing: bool) {
        let action = if typing {
            enums::SendMessageAction::Typing
        } else {
            enums::SendMessageAction::CancelTyping
        };
        let request = courier_tl::functions::messages::SetTyping { peer, action };
        let query = Query::new(
            "set typing",
            request.to_bytes(),
            QueryPolicy::slack(),
            Box::new(query::DropHandler),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    /// Rename a basic group chat.
    pub fn rename_chat(&self, chat_id: i32, title: &str, callback: ResultCallback<()>) {
        let request =
            courier_tl::functions::messages::EditChatTitle { chat_id, title: title.to_string() };
        let query = Query::new(
            "rename chat",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(UpdatesAckHandler { callback: Mutex::new(Some(callback)) }),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    /// Update the profile name of the logged-in account. Both names are
    /// written with their own length.
    pub fn set_profile_name(&self, first_name: &str, last_name: &str) {
        let request = courier_tl::functions::account::UpdateProfile {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        let query = Query::new(
            "update profile",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(UpdateProfileHandler),
        );
        self.run_on_working_dc(query, ExecOption::Default);
    }

    pub fn cancel_upload(&self, message_id: i64) {
        self.transfers().cancel_upload(message_id);
    }

    pub fn cancel_download(&self, id: i32) {
        self.transfers().cancel_download(id);
    }

    fn run_on_working_dc(&self, query: Arc<Query>, option: ExecOption) {
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, option).await;
        });
    }
}

pub(crate) fn random_i64() -> i64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("system rng unavailable");
    i64::from_le_bytes(bytes)
}

// ─── Façade handlers ─────────────────────────────────────────────────────────

struct SendCodeHandler {
    phone: String,
    callback: Mutex<Option<ResultCallback<LoginToken>>>,
}

impl QueryHandler for SendCodeHandler {
    fn on_answer(&self, _ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::auth::SentCode;
        let Some(callback) = self.callback.lock().unwrap().take() else { return };
        match SentCode::from_bytes(body) {
            Ok(SentCode::SentCode { phone_registered: _, phone_code_hash }) => {
                callback(Ok(LoginToken { phone: self.phone.clone(), phone_code_hash }));
            }
            Err(e) => callback(Err(Error::Decode(e.to_string()))),
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Err(Error::Rpc(RpcError::from_server(code, text))));
        }
        ua.sink().login_failed();
    }
}

struct SignInHandler {
    callback: Mutex<Option<ResultCallback<enums::User>>>,
}

impl QueryHandler for SignInHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::auth::Authorization;
        let Some(callback) = self.callback.lock().unwrap().take() else { return };
        match Authorization::from_bytes(body) {
            Ok(Authorization::Authorization { user }) => {
                ua.finish_login(&user);
                callback(Ok(user));
            }
            Err(e) => callback(Err(Error::Decode(e.to_string()))),
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Err(Error::Rpc(RpcError::from_server(code, text))));
        }
        ua.sink().login_failed();
    }
}

struct LogOutHandler;

impl QueryHandler for LogOutHandler {
    fn on_answer(&self, ua: &UserAgent, _body: &[u8]) {
        let working = ua.working_dc();
        working.set_state(DcState::Configured);
        ua.inner.our_id.store(0, Ordering::Release);
        let _ = ua.save_state();
        ua.sink().logged_out(true);
        log::info!("[agent] logged out");
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[agent] logout failed: {code} {text}");
        let working = ua.working_dc();
        if working.is_logging_out() {
            working.set_state(DcState::LoggedIn);
        }
        ua.sink().logged_out(false);
    }
}

struct SendMessageHandler {
    local_id: i64,
}

impl QueryHandler for SendMessageHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        // the reply is an Updates frame; let the engine advance cursors,
        // then reconcile the pending message with its server id
        if let Ok(updates) = enums::Updates::from_bytes(body) {
            let server_id = first_message_id(&updates);
            let seq = ua.update_state().seq;
            ua.process_updates(updates);
            if let Some(server_id) = server_id {
                ua.sink().message_sent(self.local_id, server_id, seq);
            }
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[agent] send message {} failed: {code} {text}", self.local_id);
    }
}

fn first_message_id(updates: &enums::Updates) -> Option<i32> {
    let from_update = |update: &enums::Update| match update {
        enums::Update::NewMessage { message, .. }
        | enums::Update::NewChannelMessage { message, .. } => Some(message.id()),
        _ => None,
    };
    match updates {
        enums::Updates::Short { update, .. } => from_update(update),
        enums::Updates::Updates { updates, .. } | enums::Updates::Combined { updates, .. } => {
            updates.iter().find_map(from_update)
        }
        enums::Updates::TooLong => None,
    }
}

struct GetDialogsHandler {
    callback: Mutex<Option<ResultCallback<DialogPage>>>,
}

impl QueryHandler for GetDialogsHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::messages::Dialogs;
        let Some(callback) = self.callback.lock().unwrap().take() else { return };
        let page = match Dialogs::from_bytes(body) {
            Ok(Dialogs::Dialogs { dialogs, messages, chats, users })
            | Ok(Dialogs::Slice { count: _, dialogs, messages, chats, users }) => {
                for user in &users {
                    ua.sink().new_user(user);
                }
                // channel dialogs carry their own pts cursor
                for dialog in &dialogs {
                    if let (enums::Peer::Channel { channel_id }, Some(pts)) =
                        (dialog.peer, dialog.pts)
                    {
                        ua.channels_mut().entry(channel_id).or_default().pts = pts;
                    }
                }
                DialogPage { dialogs, messages, chats, users }
            }
            Err(e) => {
                callback(Err(Error::Decode(e.to_string())));
                return;
            }
        };
        callback(Ok(page));
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Err(Error::Rpc(RpcError::from_server(code, text))));
        }
    }
}

struct GetHistoryHandler {
    callback: Mutex<Option<ResultCallback<Vec<enums::Message>>>>,
}

impl QueryHandler for GetHistoryHandler {
    fn on_answer(&self, _ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::messages::Messages;
        let Some(callback) = self.callback.lock().unwrap().take() else { return };
        match Messages::from_bytes(body) {
            Ok(messages) => callback(Ok(messages.into_messages())),
            Err(e) => callback(Err(Error::Decode(e.to_string()))),
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Err(Error::Rpc(RpcError::from_server(code, text))));
        }
    }
}

struct ReadHistoryHandler {
    peer: enums::Peer,
}

impl QueryHandler for ReadHistoryHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::messages::AffectedHistory;
        match AffectedHistory::from_bytes(body) {
            Ok(affected) => {
                ua.apply_affected_pts(affected.pts, affected.pts_count);
                ua.sink().messages_mark_read_in(self.peer, affected.pts);
            }
            Err(e) => log::warn!("[agent] bad readHistory answer: {e}"),
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[agent] readHistory failed: {code} {text}");
    }
}

struct UpdatesAckHandler {
    callback: Mutex<Option<ResultCallback<()>>>,
}

impl QueryHandler for UpdatesAckHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        ua.process_updates_frame(body);
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Ok(()));
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        if let Some(callback) = self.callback.lock().unwrap().take() {
            callback(Err(Error::Rpc(RpcError::from_server(code, text))));
        }
    }
}

struct UpdateProfileHandler;

impl QueryHandler for UpdateProfileHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        if let Ok(user) = enums::User::from_bytes(body) {
            ua.sink().new_user(&user);
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[agent] updateProfile failed: {code} {text}");
    }
}
