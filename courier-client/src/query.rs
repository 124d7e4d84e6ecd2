//! The query engine: one [`Query`] per in-flight RPC call, driving
//! serialization, sending, retry, acknowledgement, timeout and dispatch.
//!
//! A query is created by a typed entry point with a [`QueryHandler`] that
//! decodes the answer; the engine owns everything between `execute` and
//! the single terminal callback.

use std::io::Read;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use courier_tl::mtproto::{ID_BOOL_TRUE, ID_GZIP_PACKED, ID_RPC_ERROR};
use courier_tl::Serializable;

use crate::dc::{Dc, DcState, SessionHandle};
use crate::errors::RpcError;
use crate::timer::Timer;
use crate::UserAgent;

/// Hard cap on an inflated `gzip_packed` result.
const MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024;

/// Wait before retrying a transient server error without an explicit delay.
const SERVER_ERROR_RETRY_SECONDS: u32 = 10;

// ─── Policy ──────────────────────────────────────────────────────────────────

/// How a query is allowed to run against an unready DC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecOption {
    /// Wait for the DC to be configured and logged in.
    Default,
    /// Send as soon as a session exists (handshake-adjacent queries).
    Force,
    /// Send once configured; used by the login flow itself.
    Login,
    /// The logout query; the only query allowed while logging out.
    Logout,
}

impl ExecOption {
    pub fn is_force(self) -> bool {
        matches!(self, Self::Force)
    }

    pub fn is_login(self) -> bool {
        matches!(self, Self::Login | Self::Logout)
    }

    pub fn is_logout(self) -> bool {
        matches!(self, Self::Logout)
    }
}

/// Retry and timeout knobs. Login-style queries use [`QueryPolicy::login`];
/// low-urgency status queries use [`QueryPolicy::slack`].
#[derive(Clone, Copy, Debug)]
pub struct QueryPolicy {
    /// Seconds without result or ack before `on_timeout`.
    pub timeout: f64,
    pub retry_on_timeout: bool,
    /// Whether a locally-recovered error (migration, flood, 500) re-sends.
    pub retry_after_recover: bool,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self { timeout: 60.0, retry_on_timeout: true, retry_after_recover: true }
    }
}

impl QueryPolicy {
    /// Login queries: 20 s, no retry.
    pub fn login() -> Self {
        Self { timeout: 20.0, retry_on_timeout: false, retry_after_recover: true }
    }

    /// Mark-read and typing: patient, fire-and-forget.
    pub fn slack() -> Self {
        Self { timeout: 120.0, retry_on_timeout: false, retry_after_recover: true }
    }
}

// ─── Handler ─────────────────────────────────────────────────────────────────

/// The per-query callbacks. Exactly one of `on_answer` / `on_error` fires
/// for a terminating query; `on_timeout` precedes removal when the policy
/// forbids timeout retries.
pub trait QueryHandler: Send + Sync + 'static {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]);
    fn on_error(&self, ua: &UserAgent, code: i32, text: &str);

    fn on_timeout(&self, _ua: &UserAgent) {}

    /// The query is about to be parked on a DC's pending queue.
    fn will_be_pending(&self, _ua: &UserAgent) {}
}

/// Swallows everything. For fire-and-forget internals and tests.
pub(crate) struct DropHandler;

impl QueryHandler for DropHandler {
    fn on_answer(&self, _ua: &UserAgent, _body: &[u8]) {}
    fn on_error(&self, _ua: &UserAgent, _code: i32, _text: &str) {}
}

// ─── Query ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct QueryState {
    msg_id: i64,
    session: Option<Weak<SessionHandle>>,
    session_id: i64,
    seq_no: i32,
    ack_received: bool,
    option: Option<ExecOption>,
    dc: Option<Arc<Dc>>,
}

pub struct Query {
    name: &'static str,
    body: Vec<u8>,
    policy: QueryPolicy,
    handler: Box<dyn QueryHandler>,
    /// Non-zero pins the transport msg_id (temp-key binding).
    msg_id_override: AtomicI64,
    state: Mutex<QueryState>,
    retry_timer: Timer,
    timeout_timer: Timer,
}

impl Query {
    pub fn new(
        name: &'static str,
        body: Vec<u8>,
        policy: QueryPolicy,
        handler: Box<dyn QueryHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            body,
            policy,
            handler,
            msg_id_override: AtomicI64::new(0),
            state: Mutex::new(QueryState::default()),
            retry_timer: Timer::new(),
            timeout_timer: Timer::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn msg_id(&self) -> i64 {
        self.state.lock().unwrap().msg_id
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    pub fn handler(&self) -> &dyn QueryHandler {
        &*self.handler
    }

    pub fn ack_received(&self) -> bool {
        self.state.lock().unwrap().ack_received
    }

    pub fn set_msg_id_override(&self, msg_id: i64) {
        self.msg_id_override.store(msg_id, Ordering::Relaxed);
    }

    fn msg_id_override(&self) -> Option<i64> {
        match self.msg_id_override.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    fn option(&self) -> ExecOption {
        self.state.lock().unwrap().option.unwrap_or(ExecOption::Default)
    }

    fn dc(&self) -> Option<Arc<Dc>> {
        self.state.lock().unwrap().dc.clone()
    }

    pub(crate) fn dc_id(&self) -> Option<i32> {
        self.state.lock().unwrap().dc.as_ref().map(|dc| dc.id)
    }

    pub(crate) fn clear_timers(&self) {
        self.retry_timer.cancel();
        self.timeout_timer.cancel();
    }

    /// True while the query's last send went through the session that is
    /// still current on its DC.
    fn session_matches(&self, dc: &Dc) -> Option<Arc<SessionHandle>> {
        let state = self.state.lock().unwrap();
        let handle = state.session.as_ref()?.upgrade()?;
        if state.session_id == 0 || state.session_id != handle.session_id() {
            return None;
        }
        let current = dc.session()?;
        if Arc::ptr_eq(&current, &handle) {
            Some(handle)
        } else {
            None
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

impl UserAgent {
    /// Entry point of the query lifecycle. Applications with custom
    /// queries call this directly; the typed façade does the same.
    pub async fn execute(&self, query: Arc<Query>, dc: Arc<Dc>, option: ExecOption) {
        {
            let mut state = query.state.lock().unwrap();
            state.option = Some(option);
            state.dc = Some(dc.clone());
            state.ack_received = false;
        }

        if !self.check_connectivity(&query) || !self.check_logging_out(&query, &dc) {
            return;
        }

        let mut pending = false;
        if dc.session().is_none() {
            self.ensure_session(&dc);
            pending = true;
        }
        if !dc.is_configured() && !option.is_force() {
            pending = true;
        }
        if !dc.is_logged_in() && !option.is_login() && !option.is_force() {
            pending = true;
            if dc.id != self.working_dc_id() && self.is_logged_in() {
                self.transfer_auth(&dc);
            }
        }

        log::debug!(
            "[query] \"{}\" ({} bytes) to DC {}{}",
            query.name(),
            query.body.len(),
            dc.id,
            if pending { " (pending)" } else { "" }
        );

        if pending {
            query.handler().will_be_pending(self);
            {
                let mut state = query.state.lock().unwrap();
                state.msg_id = 0;
                state.session = None;
                state.session_id = 0;
                state.seq_no = 0;
            }
            dc.add_pending(query);
        } else {
            self.send_now(query, &dc);
        }
    }

    /// Re-attempt a query that was parked. Returns `false` when it was
    /// re-parked and the caller should stop draining.
    pub(crate) async fn execute_after_pending(&self, query: Arc<Query>, dc: &Arc<Dc>) -> bool {
        if !self.check_connectivity(&query) || !self.check_logging_out(&query, dc) {
            // executed (and failed); do not requeue
            return true;
        }

        if dc.session().is_none() {
            self.ensure_session(dc);
        }

        let option = query.option();
        let mut pending = dc.session().is_none();
        if !dc.is_configured() && !option.is_force() {
            pending = true;
        }
        if !dc.is_logged_in() && !option.is_login() && !option.is_force() {
            pending = true;
        }

        if pending {
            query.handler().will_be_pending(self);
            log::debug!("[query] \"{}\" still not ready, re-queuing on DC {}", query.name(), dc.id);
            dc.add_pending(query);
            return false;
        }

        self.send_now(query, dc);
        true
    }

    fn send_now(&self, query: Arc<Query>, dc: &Arc<Dc>) {
        let Some(handle) = dc.session() else {
            query.handler().will_be_pending(self);
            dc.add_pending(query);
            return;
        };

        let packed = {
            let mut session = handle.session.lock().unwrap();
            session.pack(&query.body, true, query.msg_id_override())
        };
        if let Err(e) = handle.conn.send(packed.bytes) {
            log::warn!("[query] \"{}\" failed to send: {e}", query.name());
            self.query_handle_error(query, 400, "CLIENT_SEND_FAILED");
            return;
        }

        let option = query.option();
        if option.is_logout() {
            dc.set_logout_query(packed.msg_id);
        }

        {
            let mut state = query.state.lock().unwrap();
            state.msg_id = packed.msg_id;
            state.session = Some(Arc::downgrade(&handle));
            state.session_id = if dc.is_configured() || option.is_force() {
                handle.session_id()
            } else {
                0
            };
            state.seq_no = packed.seq_no;
            state.ack_received = false;
        }

        self.register_query(packed.msg_id, query.clone());
        dc.note_active(packed.msg_id);
        self.arm_timeout(&query);

        log::debug!("[query] \"{}\" sent as #{}", query.name(), packed.msg_id);
    }

    /// Retry-timer entry point: re-send the query, preferring to keep its
    /// wire identity when the session is unchanged.
    pub(crate) async fn alarm(&self, query: Arc<Query>) {
        query.clear_timers();
        log::debug!("[query] alarm #{} (\"{}\")", query.msg_id(), query.name());

        if !self.check_connectivity(&query) {
            return;
        }
        let Some(dc) = query.dc() else { return };
        if !self.check_logging_out(&query, &dc) {
            return;
        }

        let option = query.option();
        let mut pending = false;
        if !dc.is_configured() && !option.is_force() {
            pending = true;
        }
        if !dc.is_logged_in() && !option.is_login() && !option.is_force() {
            pending = true;
        }

        if !pending {
            if let Some(handle) = query.session_matches(&dc) {
                // same session: re-wrap the original message so the server
                // sees the same msg_id and seq_no
                let (msg_id, seq_no) = {
                    let state = query.state.lock().unwrap();
                    (state.msg_id, state.seq_no)
                };
                let packed = {
                    let mut session = handle.session.lock().unwrap();
                    session.pack_resend_container(&query.body, msg_id, seq_no)
                };
                if let Err(e) = handle.conn.send(packed.bytes) {
                    log::warn!("[query] resend of #{msg_id} failed: {e}");
                    self.query_handle_error(query, 400, "CLIENT_SEND_FAILED");
                    return;
                }
                log::info!("[query] re-sent #{msg_id} (\"{}\")", query.name());
                // an error dispatch deregisters; the identity is unchanged
                // so the old id must resolve to this query again
                self.register_query(msg_id, query.clone());
                dc.note_active(msg_id);
                self.arm_timeout(&query);
                return;
            }

            if dc.session().is_some() {
                // session changed underneath us: full fresh send
                let old_id = query.msg_id();
                if old_id != 0 {
                    self.unregister_query(old_id);
                    dc.forget_active(old_id);
                }
                {
                    let mut state = query.state.lock().unwrap();
                    state.ack_received = false;
                }
                self.send_now(query, &dc);
                return;
            }

            self.ensure_session(&dc);
        }

        query.handler().will_be_pending(self);
        dc.add_pending(query);
    }

    /// Schedule an immediate re-send after a server hiccup invalidated the
    /// message (bad salt, bad msg notification).
    pub(crate) fn regen(&self, query: Arc<Query>) {
        {
            let mut state = query.state.lock().unwrap();
            state.ack_received = false;
        }
        let dc = query.dc();
        let matches = dc.as_ref().and_then(|dc| query.session_matches(dc)).is_some();
        if !matches {
            query.state.lock().unwrap().session_id = 0;
        }
        self.arm_retry(&query, 0.0);
    }

    fn timeout_alarm(&self, query: Arc<Query>) {
        query.clear_timers();
        query.handler().on_timeout(self);

        if query.policy().retry_on_timeout {
            let ua = self.clone();
            tokio::spawn(async move {
                ua.alarm(query).await;
            });
        } else {
            let msg_id = query.msg_id();
            if msg_id != 0 {
                self.unregister_query(msg_id);
            }
            if let Some(dc) = query.dc() {
                dc.remove_pending(&query);
                if msg_id != 0 {
                    dc.forget_active(msg_id);
                }
                dc.schedule_cleanup(self);
            }
        }
    }

    /// Server confirmed receipt of the query's message.
    pub(crate) fn ack_query(&self, msg_id: i64) {
        let Some(query) = self.query_by_msg_id(msg_id) else { return };
        {
            let mut state = query.state.lock().unwrap();
            if state.ack_received {
                return;
            }
            state.ack_received = true;
        }
        // progress heartbeat: the server has it, give it a fresh window
        self.arm_timeout(&query);

        // The server acks a logout and then drops the connection without a
        // result; the ack is the answer.
        if query.option().is_logout() {
            let mut body = Vec::new();
            ID_BOOL_TRUE.serialize(&mut body);
            self.dispatch_result(msg_id, &body);
        }
    }

    /// An `rpc_result` arrived for `msg_id`.
    pub(crate) fn dispatch_result(&self, msg_id: i64, body: &[u8]) {
        let Some(query) = self.query_by_msg_id(msg_id) else {
            log::debug!("[query] result for unknown #{msg_id}");
            return;
        };

        let inflated;
        let mut body = body;
        if body.len() >= 4
            && u32::from_le_bytes(body[..4].try_into().unwrap()) == ID_GZIP_PACKED
        {
            match inflate_packed(&body[4..]) {
                Ok(data) => {
                    inflated = data;
                    body = &inflated;
                }
                Err(e) => {
                    log::warn!("[query] #{msg_id} bad gzip result: {e}");
                    return;
                }
            }
        }

        if body.len() >= 4 && u32::from_le_bytes(body[..4].try_into().unwrap()) == ID_RPC_ERROR {
            if let Some((code, text)) = parse_rpc_error(&body[4..]) {
                self.query_handle_error(query, code, &text);
            }
            return;
        }

        log::debug!("[query] result for #{} (\"{}\"): {} bytes", msg_id, query.name(), body.len());
        query.handler().on_answer(self, body);

        query.clear_timers();
        self.unregister_query(msg_id);
        if let Some(dc) = query.dc() {
            dc.forget_active(msg_id);
            dc.schedule_cleanup(self);
        }
    }

    /// Route an `rpc_error` through the recovery table; only errors with
    /// no local recovery reach the handler.
    pub(crate) fn query_handle_error(&self, query: Arc<Query>, code: i32, text: &str) {
        let msg_id = query.msg_id();
        if msg_id != 0 {
            self.unregister_query(msg_id);
            if let Some(dc) = query.dc() {
                dc.forget_active(msg_id);
            }
        }
        query.clear_timers();

        let error = RpcError::from_server(code, text);
        let mut retry_in: f64 = 0.0;
        let mut should_retry = false;
        let mut handled = false;

        match code {
            303 => {
                if let Some(target) = error.migrate_target() {
                    log::info!("[query] #{msg_id} migrating to DC {target}");
                    let dc = self.set_working_dc(target);
                    if !dc.state().is_authorized() {
                        self.ensure_session(&dc);
                    }
                    {
                        let mut state = query.state.lock().unwrap();
                        state.ack_received = false;
                        state.session_id = 0;
                        state.dc = Some(dc);
                    }
                    should_retry =
                        query.policy().retry_after_recover || query.option().is_login();
                    handled = true;
                }
            }
            400 | 401 => {
                if error.is("SESSION_PASSWORD_NEEDED") {
                    self.begin_password_check(query.clone());
                    should_retry = query.policy().retry_after_recover;
                    handled = true;
                } else if error.is("AUTH_KEY_UNREGISTERED") || error.is("AUTH_KEY_INVALID") {
                    if let Some(dc) = query.dc() {
                        self.set_dc_logged_out(&dc);
                    }
                    should_retry = query.policy().retry_after_recover;
                    handled = true;
                } else if error.is("AUTH_KEY_PERM_EMPTY") {
                    if let Some(dc) = query.dc() {
                        self.restart_temp_authorization(&dc);
                    }
                    should_retry = query.policy().retry_after_recover;
                    handled = true;
                }
                // plain 400s are bad input; surface them
            }
            403 | 404 => {}
            _ => {
                // floods and internal errors: wait and retry
                retry_in = error.flood_wait_seconds().unwrap_or(SERVER_ERROR_RETRY_SECONDS) as f64;
                {
                    let mut state = query.state.lock().unwrap();
                    state.ack_received = false;
                }
                if let Some(dc) = query.dc() {
                    if !dc.is_configured() && !query.option().is_force() {
                        query.state.lock().unwrap().session_id = 0;
                    }
                }
                should_retry = query.policy().retry_after_recover;
                handled = true;
            }
        }

        if should_retry {
            self.arm_retry(&query, retry_in);
        }

        if handled {
            log::info!("[query] #{msg_id} error {code} \"{text}\" handled locally");
        } else {
            log::warn!("[query] #{msg_id} (\"{}\") error {code}: {text}", query.name());
            query.handler().on_error(self, code, text);
            if let Some(dc) = query.dc() {
                dc.schedule_cleanup(self);
            }
        }
    }

    // ── timers and registry ────────────────────────────────────────────────

    pub(crate) fn arm_timeout(&self, query: &Arc<Query>) {
        let ua = self.clone();
        let q = query.clone();
        query.timeout_timer.start(query.policy().timeout, async move {
            ua.timeout_alarm(q);
        });
    }

    pub(crate) fn arm_retry(&self, query: &Arc<Query>, seconds: f64) {
        let ua = self.clone();
        let q = query.clone();
        query.retry_timer.start(seconds, async move {
            ua.alarm(q).await;
        });
    }

    fn check_connectivity(&self, query: &Arc<Query>) -> bool {
        if self.is_online() {
            return true;
        }
        log::warn!("[query] offline, failing \"{}\"", query.name());
        query.handler().on_error(self, 600, "NOT_CONNECTED");
        false
    }

    fn check_logging_out(&self, query: &Arc<Query>, dc: &Arc<Dc>) -> bool {
        if dc.is_logging_out() && !query.option().is_logout() && !query.option().is_force() {
            query.handler().on_error(self, 600, "LOGGING_OUT");
            return false;
        }
        true
    }
}

// ─── Temp-key binding handler ────────────────────────────────────────────────

pub(crate) struct BindTempKeyHandler {
    pub dc: Weak<Dc>,
}

impl QueryHandler for BindTempKeyHandler {
    fn on_answer(&self, _ua: &UserAgent, _body: &[u8]) {
        if let Some(dc) = self.dc.upgrade() {
            if !dc.is_configured() {
                dc.set_state(DcState::TempBound);
            }
            log::info!("[dc{}] temp key bound", dc.id);
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        if let Some(dc) = self.dc.upgrade() {
            log::warn!("[dc{}] temp key bind failed: {code} {text}", dc.id);
            ua.restart_temp_authorization(&dc);
        }
    }

    fn on_timeout(&self, ua: &UserAgent) {
        if let Some(dc) = self.dc.upgrade() {
            log::warn!("[dc{}] temp key bind timed out", dc.id);
            ua.restart_temp_authorization(&dc);
        }
    }
}

// ─── helpers ─────────────────────────────────────────────────────────────────

/// Inflate a `gzip_packed` payload (TL bytes already stripped of the
/// constructor id) into at most [`MAX_INFLATED_SIZE`] bytes.
fn inflate_packed(data: &[u8]) -> Result<Vec<u8>, crate::Error> {
    let mut cursor = courier_tl::Cursor::from_slice(data);
    let packed = <Vec<u8> as courier_tl::Deserializable>::deserialize(&mut cursor)
        .map_err(|e| crate::Error::Decode(e.to_string()))?;

    let mut out = Vec::new();
    let mut limited = flate2::read::GzDecoder::new(packed.as_slice())
        .take(MAX_INFLATED_SIZE as u64 + 1);
    if limited.read_to_end(&mut out).is_err() || out.is_empty() {
        out.clear();
        let mut limited = flate2::read::ZlibDecoder::new(packed.as_slice())
            .take(MAX_INFLATED_SIZE as u64 + 1);
        limited
            .read_to_end(&mut out)
            .map_err(|_| crate::Error::Decode("inflate failed".into()))?;
    }
    if out.len() > MAX_INFLATED_SIZE {
        return Err(crate::Error::Decode("inflated result exceeds 16 MiB".into()));
    }
    Ok(out)
}

/// Parse an `rpc_error` body (constructor already consumed).
pub(crate) fn parse_rpc_error(data: &[u8]) -> Option<(i32, String)> {
    let mut cursor = courier_tl::Cursor::from_slice(data);
    let code = <i32 as courier_tl::Deserializable>::deserialize(&mut cursor).ok()?;
    let text = <String as courier_tl::Deserializable>::deserialize(&mut cursor).ok()?;
    Some((code, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies() {
        let login = QueryPolicy::login();
        assert_eq!(login.timeout, 20.0);
        assert!(!login.retry_on_timeout);
        let slack = QueryPolicy::slack();
        assert_eq!(slack.timeout, 120.0);
    }

    #[test]
    fn exec_option_predicates() {
        assert!(ExecOption::Force.is_force());
        assert!(ExecOption::Login.is_login());
        assert!(ExecOption::Logout.is_login());
        assert!(ExecOption::Logout.is_logout());
        assert!(!ExecOption::Default.is_login());
    }

    #[test]
    fn rpc_error_body_parses() {
        let mut body = Vec::new();
        420i32.serialize(&mut body);
        "FLOOD_WAIT_12".to_string().serialize(&mut body);
        let (code, text) = parse_rpc_error(&body).unwrap();
        assert_eq!(code, 420);
        assert_eq!(text, "FLOOD_WAIT_12");
    }

    #[test]
    fn inflate_rejects_garbage() {
        let mut data = Vec::new();
        vec![1u8, 2, 3].serialize(&mut data);
        assert!(inflate_packed(&data).is_err());
    }
}
