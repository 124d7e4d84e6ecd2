//! Per-DC state: authorization progress, the live session, the pending
//! query queue and the idle-session cleanup timer.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use courier_crypto::AuthKey;
use courier_mtproto::authentication::{self as auth, KeyScope};
use courier_mtproto::{PlainMessage, Session};
use courier_tl::mtproto::BindAuthKeyInner;
use courier_tl::{Deserializable, RemoteCall, Serializable};

use crate::net::Connection;
use crate::query::{ExecOption, Query, QueryPolicy};
use crate::timer::Timer;
use crate::{Error, UserAgent};

/// Seconds an idle non-working DC keeps its session alive.
pub const SESSION_CLEANUP_TIMEOUT: f64 = 5.0;

/// Lifetime requested for PFS temporary keys.
pub const TEMP_AUTH_KEY_LIFETIME: i32 = 24 * 60 * 60;

// ─── DcState ─────────────────────────────────────────────────────────────────

/// Authorization progress of one DC. Monotone during normal operation;
/// only key loss or logout walks it backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DcState {
    Init,
    Handshaking,
    HavePermanent,
    TempRequested,
    TempBound,
    Configured,
    LoggedIn,
    LoggingOut,
}

impl DcState {
    pub fn is_configured(self) -> bool {
        matches!(self, Self::Configured | Self::LoggedIn | Self::LoggingOut)
    }

    pub fn is_logged_in(self) -> bool {
        matches!(self, Self::LoggedIn)
    }

    pub fn is_logging_out(self) -> bool {
        matches!(self, Self::LoggingOut)
    }

    /// Whether a permanent key exists at this point of the ladder.
    pub fn is_authorized(self) -> bool {
        !matches!(self, Self::Init | Self::Handshaking)
    }
}

// ─── SessionHandle ───────────────────────────────────────────────────────────

/// A [`Session`] bound to its connection, plus the ack-flush timer.
pub struct SessionHandle {
    pub session: Mutex<Session>,
    pub conn: Connection,
    pub ack_timer: Timer,
}

impl SessionHandle {
    pub fn new(session: Session, conn: Connection) -> Arc<Self> {
        Arc::new(Self { session: Mutex::new(session), conn, ack_timer: Timer::new() })
    }

    pub fn session_id(&self) -> i64 {
        self.session.lock().unwrap().session_id()
    }

    /// Close the connection and cancel everything the session owns.
    pub fn shut_down(&self) {
        self.ack_timer.cancel();
        self.conn.close();
    }
}

// ─── Dc ──────────────────────────────────────────────────────────────────────

/// One reachable address of a DC.
#[derive(Clone, Debug, PartialEq)]
pub struct DcAddress {
    pub ip: String,
    pub port: i32,
    pub ipv6: bool,
    pub media_only: bool,
}

impl DcAddress {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

pub struct Dc {
    pub id: i32,
    addresses: Mutex<Vec<DcAddress>>,
    state: Mutex<DcState>,

    perm_key: Mutex<Option<AuthKey>>,
    temp_key: Mutex<Option<AuthKey>>,
    temp_expires_at: AtomicI32,
    server_salt: AtomicI64,
    server_time_delta: AtomicI32,

    session: Mutex<Option<Arc<SessionHandle>>>,
    pending: Mutex<VecDeque<Arc<Query>>>,
    active: Mutex<HashSet<i64>>,

    pub(crate) auth_transfer_in_process: AtomicBool,
    pub(crate) channel_diff_locked: AtomicBool,
    pub(crate) bringup_in_process: AtomicBool,
    logout_query_msg_id: AtomicI64,

    cleanup_timer: Timer,
}

impl Dc {
    pub fn new(id: i32, addresses: Vec<DcAddress>) -> Arc<Self> {
        Arc::new(Self {
            id,
            addresses: Mutex::new(addresses),
            state: Mutex::new(DcState::Init),
            perm_key: Mutex::new(None),
            temp_key: Mutex::new(None),
            temp_expires_at: AtomicI32::new(0),
            server_salt: AtomicI64::new(0),
            server_time_delta: AtomicI32::new(0),
            session: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashSet::new()),
            auth_transfer_in_process: AtomicBool::new(false),
            channel_diff_locked: AtomicBool::new(false),
            bringup_in_process: AtomicBool::new(false),
            logout_query_msg_id: AtomicI64::new(0),
            cleanup_timer: Timer::new(),
        })
    }

    // ── state ──────────────────────────────────────────────────────────────

    pub fn state(&self) -> DcState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: DcState) {
        log::debug!("[dc{}] state -> {state:?}", self.id);
        *self.state.lock().unwrap() = state;
    }

    pub fn is_configured(&self) -> bool {
        self.state().is_configured()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().is_logged_in()
    }

    pub fn is_logging_out(&self) -> bool {
        self.state().is_logging_out()
    }

    // ── addresses ──────────────────────────────────────────────────────────

    pub fn primary_endpoint(&self) -> Option<String> {
        let addresses = self.addresses.lock().unwrap();
        addresses
            .iter()
            .find(|a| !a.ipv6 && !a.media_only)
            .or_else(|| addresses.first())
            .map(|a| a.endpoint())
    }

    pub fn replace_addresses(&self, addresses: Vec<DcAddress>) {
        if !addresses.is_empty() {
            *self.addresses.lock().unwrap() = addresses;
        }
    }

    pub fn addresses(&self) -> Vec<DcAddress> {
        self.addresses.lock().unwrap().clone()
    }

    // ── keys / salt / clock ────────────────────────────────────────────────

    pub fn perm_key(&self) -> Option<AuthKey> {
        self.perm_key.lock().unwrap().clone()
    }

    pub fn set_perm_key(&self, key: Option<AuthKey>) {
        *self.perm_key.lock().unwrap() = key;
    }

    pub fn temp_key(&self) -> Option<AuthKey> {
        self.temp_key.lock().unwrap().clone()
    }

    pub fn set_temp_key(&self, key: Option<AuthKey>, expires_at: i32) {
        *self.temp_key.lock().unwrap() = key;
        self.temp_expires_at.store(expires_at, Ordering::Relaxed);
    }

    pub fn temp_expires_at(&self) -> i32 {
        self.temp_expires_at.load(Ordering::Relaxed)
    }

    /// The key the session encrypts with: the bound temp key when PFS is
    /// active, the permanent key otherwise.
    pub fn active_key(&self) -> Option<AuthKey> {
        self.temp_key().or_else(|| self.perm_key())
    }

    pub fn server_salt(&self) -> i64 {
        self.server_salt.load(Ordering::Relaxed)
    }

    pub fn set_server_salt(&self, salt: i64) {
        self.server_salt.store(salt, Ordering::Relaxed);
    }

    pub fn server_time_delta(&self) -> i32 {
        self.server_time_delta.load(Ordering::Relaxed)
    }

    pub fn set_server_time_delta(&self, delta: i32) {
        self.server_time_delta.store(delta, Ordering::Relaxed);
    }

    // ── session ────────────────────────────────────────────────────────────

    pub fn session(&self) -> Option<Arc<SessionHandle>> {
        self.session.lock().unwrap().clone()
    }

    pub fn set_session(&self, handle: Option<Arc<SessionHandle>>) {
        let old = std::mem::replace(&mut *self.session.lock().unwrap(), handle);
        if let Some(old) = old {
            old.shut_down();
        }
    }

    /// Drop the session and all its timers (cleanup expiry, reset, logout).
    pub fn close_session(&self) {
        self.set_session(None);
    }

    // ── pending queue ──────────────────────────────────────────────────────

    pub fn add_pending(&self, query: Arc<Query>) {
        let mut pending = self.pending.lock().unwrap();
        if !pending.iter().any(|q| Arc::ptr_eq(q, &query)) {
            pending.push_back(query);
        }
        self.cleanup_timer.cancel();
    }

    pub fn remove_pending(&self, query: &Arc<Query>) {
        self.pending.lock().unwrap().retain(|q| !Arc::ptr_eq(q, query));
    }

    /// Detach the whole pending list, preserving order.
    pub fn take_pending(&self) -> Vec<Arc<Query>> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    // ── active queries / cleanup ───────────────────────────────────────────

    pub fn note_active(&self, msg_id: i64) {
        self.active.lock().unwrap().insert(msg_id);
        self.cleanup_timer.cancel();
    }

    pub fn forget_active(&self, msg_id: i64) {
        self.active.lock().unwrap().remove(&msg_id);
    }

    pub fn active_len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.lock().unwrap().is_empty() && self.pending.lock().unwrap().is_empty()
    }

    pub fn set_logout_query(&self, msg_id: i64) {
        self.logout_query_msg_id.store(msg_id, Ordering::Relaxed);
    }

    pub fn logout_query(&self) -> i64 {
        self.logout_query_msg_id.load(Ordering::Relaxed)
    }

    /// Arm the 5-second idle timer. The expiry re-checks idleness before
    /// closing, since activity only cancels lazily.
    pub fn schedule_cleanup(self: &Arc<Self>, ua: &UserAgent) {
        if !self.is_idle() || ua.working_dc_id() == self.id {
            return;
        }
        let dc = self.clone();
        self.cleanup_timer.start(SESSION_CLEANUP_TIMEOUT, async move {
            if dc.is_idle() {
                log::debug!("[dc{}] idle, closing session", dc.id);
                dc.close_session();
            }
        });
    }

    /// Wipe authorization entirely (key loss, reset).
    pub fn reset(&self) {
        log::debug!("[dc{}] reset", self.id);
        self.close_session();
        self.set_perm_key(None);
        self.set_temp_key(None, 0);
        self.set_server_salt(0);
        self.set_state(DcState::Init);
    }
}

// ─── Bring-up and cross-DC flows ─────────────────────────────────────────────

impl UserAgent {
    /// Make sure `dc` has a session, creating one (and running whatever
    /// part of the authorization ladder is missing) in the background.
    /// Queries parked on the DC are drained when the ladder completes.
    pub(crate) fn ensure_session(&self, dc: &Arc<Dc>) {
        if dc.session().is_some() {
            return;
        }
        if dc.bringup_in_process.swap(true, Ordering::AcqRel) {
            return;
        }
        let ua = self.clone();
        let dc = dc.clone();
        tokio::spawn(async move {
            let result = ua.bring_up(&dc).await;
            dc.bringup_in_process.store(false, Ordering::Release);
            match result {
                Ok(()) => ua.send_pending_queries(&dc).await,
                Err(e) => {
                    log::warn!("[dc{}] bring-up failed: {e}", dc.id);
                    ua.fail_pending_queries(&dc, 600, "NOT_CONNECTED");
                }
            }
        });
    }

    async fn bring_up(&self, dc: &Arc<Dc>) -> Result<(), Error> {
        let endpoint = dc
            .primary_endpoint()
            .ok_or_else(|| Error::Decode(format!("no address known for DC {}", dc.id)))?;
        let conn = self.connection_factory().open(&endpoint).await?;

        if dc.perm_key().is_none() {
            dc.set_state(DcState::Handshaking);
            let done = self.run_handshake(&conn, KeyScope::Permanent).await?;
            dc.set_perm_key(Some(AuthKey::from_bytes(done.auth_key)));
            dc.set_server_salt(done.first_salt);
            dc.set_server_time_delta(done.time_offset);
            log::info!("[dc{}] permanent key ready", dc.id);
        }
        // reconnection with saved keys must not walk the ladder backwards
        if !dc.state().is_authorized() {
            dc.set_state(DcState::HavePermanent);
        }

        if self.config().pfs_enabled {
            if !dc.is_configured() {
                dc.set_state(DcState::TempRequested);
            }
            let done = self
                .run_handshake(&conn, KeyScope::Temp { expires_in: TEMP_AUTH_KEY_LIFETIME })
                .await?;
            let expires_at = self.server_now(dc) + TEMP_AUTH_KEY_LIFETIME;
            dc.set_temp_key(Some(AuthKey::from_bytes(done.auth_key)), expires_at);
            dc.set_server_salt(done.first_salt);
            log::info!("[dc{}] temporary key ready", dc.id);
        }

        let key = dc
            .active_key()
            .ok_or_else(|| Error::Decode("no key after handshake".into()))?;
        let session = Session::new(key, dc.server_salt(), dc.server_time_delta());
        let handle = SessionHandle::new(session, conn);
        dc.set_session(Some(handle.clone()));
        self.spawn_receive_loop(dc.clone(), handle);

        if self.config().pfs_enabled {
            self.bind_temp_key(dc).await?;
        }

        self.configure_dc(dc);
        Ok(())
    }

    /// Run the four-step key exchange over a fresh connection, in
    /// plaintext frames.
    async fn run_handshake(
        &self,
        conn: &Connection,
        scope: KeyScope,
    ) -> Result<auth::Finished, Error> {
        let (req1, s1) = auth::step1(scope).map_err(handshake_err)?;
        let res_pq = self.plain_round_trip(conn, &req1).await?;
        let (req2, s2) = auth::step2(s1, res_pq).map_err(handshake_err)?;
        let dh_params = self.plain_round_trip(conn, &req2).await?;
        let (req3, s3) = auth::step3(s2, dh_params).map_err(handshake_err)?;
        let answer = self.plain_round_trip(conn, &req3).await?;
        auth::finish(s3, answer).map_err(handshake_err)
    }

    async fn plain_round_trip<R: RemoteCall>(
        &self,
        conn: &Connection,
        request: &R,
    ) -> Result<R::Return, Error> {
        let msg_id = plain_msg_id();
        conn.send(PlainMessage::new(msg_id, request.to_bytes()).to_bytes())?;
        let frame = conn.recv().await.ok_or(Error::NotConnected)?;
        let body = PlainMessage::from_frame(&frame)
            .ok_or_else(|| Error::Decode("bad plaintext frame".into()))?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Bind the fresh temp key to the permanent one. Runs as a forced
    /// query on the new session; failure restarts temporary auth.
    async fn bind_temp_key(&self, dc: &Arc<Dc>) -> Result<(), Error> {
        let perm = dc.perm_key().ok_or_else(|| Error::Decode("no permanent key".into()))?;
        let temp = dc.temp_key().ok_or_else(|| Error::Decode("no temp key".into()))?;
        let handle = dc.session().ok_or(Error::NotConnected)?;

        let mut nonce_bytes = [0u8; 8];
        getrandom::getrandom(&mut nonce_bytes).expect("system rng unavailable");
        let nonce = i64::from_le_bytes(nonce_bytes);
        let expires_at = dc.temp_expires_at();
        let perm_key_id = perm.key_id_u64() as i64;

        // The inner payload travels encrypted under the *permanent* key in
        // its own throwaway session frame.
        let (inner_frame, bind_msg_id) = {
            let temp_session_id = handle.session_id();
            let inner = BindAuthKeyInner {
                nonce,
                temp_auth_key_id: temp.key_id_u64() as i64,
                perm_auth_key_id: perm_key_id,
                temp_session_id,
                expires_at,
            }
            .to_bytes();
            let mut perm_session = Session::new(perm, dc.server_salt(), dc.server_time_delta());
            let packed = perm_session.pack(&inner, true, None);
            (packed.bytes, packed.msg_id)
        };

        let request = courier_tl::functions::auth::BindTempAuthKey {
            perm_auth_key_id: perm_key_id,
            nonce,
            expires_at,
            encrypted_message: inner_frame,
        };

        let query = Query::new(
            "bind temp auth key",
            request.to_bytes(),
            QueryPolicy { timeout: 20.0, retry_on_timeout: false, retry_after_recover: false },
            Box::new(crate::query::BindTempKeyHandler { dc: Arc::downgrade(dc) }),
        );
        // The bind must carry its own msg_id matching the inner payload.
        query.set_msg_id_override(bind_msg_id);
        self.execute(query, dc.clone(), ExecOption::Force).await;
        if !dc.is_configured() {
            dc.set_state(DcState::TempBound);
        }
        Ok(())
    }

    /// `help.getConfig` on the new session; configuration unparks queries.
    fn configure_dc(&self, dc: &Arc<Dc>) {
        use courier_tl::functions::{help::GetConfig, InitConnection, InvokeWithLayer};

        let config = self.config();
        let request = InvokeWithLayer {
            layer: courier_tl::LAYER,
            query: InitConnection {
                api_id: config.app_id,
                device_model: config.device_model.clone(),
                system_version: config.system_version.clone(),
                app_version: format!("{} (courier {})", config.app_version, env!("CARGO_PKG_VERSION")),
                lang_code: config.lang_code.clone(),
                query: GetConfig,
            },
        };

        let query = Query::new(
            "init connection",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(ConfigureHandler { dc: Arc::downgrade(dc) }),
        );
        let ua = self.clone();
        let dc = dc.clone();
        tokio::spawn(async move {
            ua.execute(query, dc, ExecOption::Force).await;
        });
    }

    /// Re-run temporary-key authorization after `AUTH_KEY_PERM_EMPTY` or a
    /// failed bind.
    pub(crate) fn restart_temp_authorization(&self, dc: &Arc<Dc>) {
        dc.set_temp_key(None, 0);
        dc.close_session();
        if dc.state().is_authorized() {
            dc.set_state(DcState::HavePermanent);
        }
        self.ensure_session(dc);
    }

    /// Drain the pending queue in order; queries that still cannot run are
    /// re-parked at the tail.
    pub(crate) async fn send_pending_queries(&self, dc: &Arc<Dc>) {
        let queries = dc.take_pending();
        if queries.is_empty() {
            return;
        }
        log::debug!("[dc{}] sending {} pending queries", dc.id, queries.len());
        for query in queries {
            self.execute_after_pending(query, dc).await;
        }
    }

    pub(crate) fn fail_pending_queries(&self, dc: &Arc<Dc>, code: i32, text: &str) {
        for query in dc.take_pending() {
            query.handler().on_error(self, code, text);
        }
    }

    /// Export authorization from the working DC and import it into `dc`.
    /// Idempotent while a transfer is already running.
    pub(crate) fn transfer_auth(&self, dc: &Arc<Dc>) {
        if dc.auth_transfer_in_process.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[dc{}] starting auth transfer from working DC", dc.id);

        let request = courier_tl::functions::auth::ExportAuthorization { dc_id: dc.id };
        let query = Query::new(
            "export authorization",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(ExportAuthHandler { target: Arc::downgrade(dc) }),
        );
        let ua = self.clone();
        let working = self.working_dc();
        tokio::spawn(async move {
            ua.execute(query, working, ExecOption::Default).await;
        });
    }

    pub(crate) fn server_now(&self, dc: &Dc) -> i32 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i32;
        now + dc.server_time_delta()
    }
}

fn handshake_err(e: auth::Error) -> Error {
    Error::Decode(e.to_string())
}

fn plain_msg_id() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    ((now.as_secs() << 32) | ((now.subsec_nanos() as u64) << 2)) as i64
}

// ─── DC-flow query handlers ──────────────────────────────────────────────────

struct ConfigureHandler {
    dc: std::sync::Weak<Dc>,
}

impl crate::query::QueryHandler for ConfigureHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        let Some(dc) = self.dc.upgrade() else { return };
        match courier_tl::schema::help::Config::from_bytes(body) {
            Ok(courier_tl::schema::help::Config::Config(config)) => {
                ua.apply_dc_options(&config.dc_options);
                if !dc.state().is_logged_in() && !dc.is_logging_out() {
                    dc.set_state(DcState::Configured);
                }
                if ua.is_logged_in() && ua.working_dc_id() == dc.id {
                    dc.set_state(DcState::LoggedIn);
                }
                log::info!("[dc{}] configured ({} dc options)", dc.id, config.dc_options.len());
            }
            Err(e) => {
                log::warn!("[dc{}] bad config answer: {e}", dc.id);
                if !dc.state().is_configured() {
                    dc.set_state(DcState::Configured);
                }
            }
        }
        let ua = ua.clone();
        tokio::spawn(async move {
            ua.send_pending_queries(&dc).await;
        });
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        if let Some(dc) = self.dc.upgrade() {
            log::warn!("[dc{}] init connection failed: {code} {text}", dc.id);
            ua.fail_pending_queries(&dc, code, text);
        }
    }
}

struct ExportAuthHandler {
    target: std::sync::Weak<Dc>,
}

impl crate::query::QueryHandler for ExportAuthHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        let Some(dc) = self.target.upgrade() else { return };
        use courier_tl::schema::auth::ExportedAuthorization;
        match ExportedAuthorization::from_bytes(body) {
            Ok(ExportedAuthorization::ExportedAuthorization { id, bytes }) => {
                let request = courier_tl::functions::auth::ImportAuthorization { id, bytes };
                let query = Query::new(
                    "import authorization",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(ImportAuthHandler { target: Arc::downgrade(&dc) }),
                );
                let ua = ua.clone();
                tokio::spawn(async move {
                    ua.execute(query, dc, ExecOption::Login).await;
                });
            }
            Err(e) => {
                log::warn!("[dc{}] export authorization decode failed: {e}", dc.id);
                dc.auth_transfer_in_process.store(false, Ordering::Release);
            }
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        if let Some(dc) = self.target.upgrade() {
            log::warn!("[dc{}] export authorization failed: {code} {text}", dc.id);
            dc.auth_transfer_in_process.store(false, Ordering::Release);
        }
    }
}

struct ImportAuthHandler {
    target: std::sync::Weak<Dc>,
}

impl crate::query::QueryHandler for ImportAuthHandler {
    fn on_answer(&self, ua: &UserAgent, _body: &[u8]) {
        let Some(dc) = self.target.upgrade() else { return };
        dc.auth_transfer_in_process.store(false, Ordering::Release);
        dc.set_state(DcState::LoggedIn);
        log::info!("[dc{}] authorization imported", dc.id);
        let ua = ua.clone();
        tokio::spawn(async move {
            ua.send_pending_queries(&dc).await;
        });
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        if let Some(dc) = self.target.upgrade() {
            log::warn!("[dc{}] import authorization failed: {code} {text}", dc.id);
            dc.auth_transfer_in_process.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(!DcState::Init.is_configured());
        assert!(!DcState::TempBound.is_configured());
        assert!(DcState::Configured.is_configured());
        assert!(DcState::LoggedIn.is_configured());
        assert!(DcState::LoggedIn.is_logged_in());
        assert!(DcState::LoggingOut.is_configured());
        assert!(!DcState::Handshaking.is_authorized());
        assert!(DcState::HavePermanent.is_authorized());
    }

    #[test]
    fn primary_endpoint_prefers_plain_ipv4() {
        let dc = Dc::new(
            2,
            vec![
                DcAddress { ip: "2001:db8::1".into(), port: 443, ipv6: true, media_only: false },
                DcAddress { ip: "10.1.2.3".into(), port: 443, ipv6: false, media_only: false },
            ],
        );
        assert_eq!(dc.primary_endpoint().unwrap(), "10.1.2.3:443");
    }

    #[test]
    fn pending_queue_deduplicates() {
        let dc = Dc::new(1, Vec::new());
        let q = Query::new(
            "test",
            Vec::new(),
            QueryPolicy::default(),
            Box::new(crate::query::DropHandler),
        );
        dc.add_pending(q.clone());
        dc.add_pending(q.clone());
        assert_eq!(dc.pending_len(), 1);
        dc.remove_pending(&q);
        assert_eq!(dc.pending_len(), 0);
    }
}
