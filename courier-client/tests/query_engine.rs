//! End-to-end query-engine scenarios against a loopback "server": flood
//! retries, migration redirects, acks and the logout quirk.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_client::dc::{Dc, DcState, SessionHandle};
use courier_client::{
    Config, ConnectionFactory, ExecOption, InMemoryBackend, LoopbackFactory, LoopbackPeer,
    NullSink, Query, QueryHandler, QueryPolicy, UserAgent,
};
use courier_crypto::{self as crypto, AuthKey, Side};
use courier_mtproto::Session;
use courier_tl::Serializable;

const ID_RPC_RESULT: u32 = 0xf35c6d01;
const ID_RPC_ERROR: u32 = 0x2144ca19;
const ID_MSG_CONTAINER: u32 = 0x73f1f8dc;
const ID_MSGS_ACK: u32 = 0x62d6b459;
const ID_BOOL_TRUE: u32 = 0x997275b5;

// ─── Harness ─────────────────────────────────────────────────────────────────

fn test_auth_key() -> AuthKey {
    let mut data = [0u8; 256];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i * 5 + 11) as u8;
    }
    AuthKey::from_bytes(data)
}

#[derive(Default)]
struct Recording {
    answers: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<(i32, String)>>,
}

struct RecordingHandler(Arc<Recording>);

impl QueryHandler for RecordingHandler {
    fn on_answer(&self, _ua: &UserAgent, body: &[u8]) {
        self.0.answers.lock().unwrap().push(body.to_vec());
    }
    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        self.0.errors.lock().unwrap().push((code, text.to_string()));
    }
}

struct Peer {
    inner: LoopbackPeer,
    key: AuthKey,
    session_id: i64,
    seq: i32,
}

impl Peer {
    /// Wait for the next client frame and decrypt it with the sender-side
    /// schedule. Returns `(msg_id, body)`.
    async fn recv(&mut self) -> (i64, Vec<u8>) {
        let mut frame = self.inner.from_client.recv().await.expect("client frame");
        let (msg_key, plain) =
            crypto::decrypt_message(&mut frame, &self.key, Side::Client).unwrap();
        let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
        let len = u32::from_le_bytes(plain[28..32].try_into().unwrap()) as usize;
        crypto::verify_msg_key(&plain[..32 + len], &msg_key).unwrap();
        (msg_id, plain[32..32 + len].to_vec())
    }

    /// Encrypt `body` as a server message and push it to the client.
    fn send(&mut self, body: &[u8]) {
        let mut plain = Vec::new();
        plain.extend(0i64.to_le_bytes()); // salt
        plain.extend(self.session_id.to_le_bytes());
        plain.extend(((self.seq as i64) << 21 | 4).to_le_bytes()); // server msg_id, odd enough
        self.seq += 2;
        plain.extend(2i32.to_le_bytes()); // even: no ack required
        plain.extend((body.len() as u32).to_le_bytes());
        plain.extend_from_slice(body);

        let msg_key = crypto::calc_msg_key(&plain);
        while plain.len() % 16 != 0 {
            plain.push(0);
        }
        let (aes_key, aes_iv) = crypto::calc_key(self.key.data(), &msg_key, Side::Server);
        courier_crypto::aes::ige_encrypt(&mut plain, &aes_key, &aes_iv);

        let mut frame = Vec::new();
        frame.extend_from_slice(&self.key.key_id());
        frame.extend_from_slice(&msg_key);
        frame.extend_from_slice(&plain);
        self.inner.to_client.send(frame).unwrap();
    }

    fn send_rpc_error(&mut self, req_msg_id: i64, code: i32, text: &str) {
        let mut body = Vec::new();
        ID_RPC_RESULT.serialize(&mut body);
        req_msg_id.serialize(&mut body);
        ID_RPC_ERROR.serialize(&mut body);
        code.serialize(&mut body);
        text.to_string().serialize(&mut body);
        self.send(&body);
    }

    fn send_rpc_result(&mut self, req_msg_id: i64, result: &[u8]) {
        let mut body = Vec::new();
        ID_RPC_RESULT.serialize(&mut body);
        req_msg_id.serialize(&mut body);
        body.extend_from_slice(result);
        self.send(&body);
    }

    fn send_ack(&mut self, msg_ids: Vec<i64>) {
        let mut body = Vec::new();
        ID_MSGS_ACK.serialize(&mut body);
        msg_ids.serialize(&mut body);
        self.send(&body);
    }
}

/// Spin up an agent with one established, logged-in DC backed by a
/// loopback connection.
async fn established_agent() -> (UserAgent, Arc<Dc>, Peer, Arc<LoopbackFactory>) {
    let factory = LoopbackFactory::new();
    let config = Config {
        state_backend: Arc::new(InMemoryBackend::new()),
        connection_factory: factory.clone(),
        sink: Arc::new(NullSink),
        journal_dir: std::env::temp_dir().join(format!("courier-test-{}", std::process::id())),
        ..Config::default()
    };
    let ua = UserAgent::new(config);
    ua.set_online(true);

    let key = test_auth_key();
    let dc = ua.dc_by_id(2);
    dc.set_perm_key(Some(key.clone()));
    dc.set_state(DcState::LoggedIn);

    let conn = factory.open("149.154.167.51:443").await.unwrap();
    let session = Session::new(key.clone(), 0x55aa, 0);
    let handle = SessionHandle::new(session, conn);
    let session_id = handle.session_id();
    ua.adopt_session(&dc, handle);

    let inner = factory.endpoints().pop().unwrap();
    (ua, dc, Peer { inner, key, session_id, seq: 2 }, factory)
}

async fn settle() {
    // paused-clock runtimes auto-advance while every task is idle
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn result_reaches_the_handler_exactly_once() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "probe",
        vec![1, 2, 3, 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query, dc, ExecOption::Default).await;

    let (msg_id, body) = peer.recv().await;
    assert_eq!(body, vec![1, 2, 3, 4]);

    let mut result = Vec::new();
    ID_BOOL_TRUE.serialize(&mut result);
    peer.send_rpc_result(msg_id, &result);
    settle().await;

    let answers = recording.answers.lock().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0], result);
    assert!(recording.errors.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn flood_wait_backs_off_and_resends_with_the_same_identity() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "send message",
        vec![0xaa; 8],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query.clone(), dc, ExecOption::Default).await;

    let (msg_id, _) = peer.recv().await;
    peer.send_rpc_error(msg_id, 420, "FLOOD_WAIT_12");
    settle().await;

    // no user callback — the engine is waiting out the flood
    assert!(recording.answers.lock().unwrap().is_empty());
    assert!(recording.errors.lock().unwrap().is_empty());

    // after the flood window the query goes out again, wrapped in a
    // container that preserves the original msg_id
    tokio::time::sleep(Duration::from_secs(13)).await;
    let (_, resent) = peer.recv().await;
    let constructor = u32::from_le_bytes(resent[..4].try_into().unwrap());
    assert_eq!(constructor, ID_MSG_CONTAINER);
    let inner_msg_id = i64::from_le_bytes(resent[8..16].try_into().unwrap());
    assert_eq!(inner_msg_id, msg_id, "resend keeps the wire identity");

    // and a result for the old id still resolves to the query
    let mut result = Vec::new();
    ID_BOOL_TRUE.serialize(&mut result);
    peer.send_rpc_result(msg_id, &result);
    settle().await;
    assert_eq!(recording.answers.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn migration_303_switches_the_working_dc() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    assert_eq!(ua.working_dc_id(), 2);

    let query = Query::new(
        "any query",
        vec![0x11; 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query, dc, ExecOption::Default).await;

    let (msg_id, _) = peer.recv().await;
    peer.send_rpc_error(msg_id, 303, "PHONE_MIGRATE_5");
    settle().await;

    // the working DC changed and authorization of DC 5 restarted
    assert_eq!(ua.working_dc_id(), 5);
    let dc5 = ua.dc_by_id(5);
    assert!(recording.errors.lock().unwrap().is_empty(), "migration is handled locally");

    // the retried query is parked on DC 5 until its bring-up finishes
    settle().await;
    assert_eq!(dc5.pending_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ack_marks_the_query_and_keeps_it_alive() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "slow query",
        vec![0x77; 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query.clone(), dc, ExecOption::Default).await;

    let (msg_id, _) = peer.recv().await;
    assert!(!query.ack_received());

    peer.send_ack(vec![msg_id]);
    settle().await;
    assert!(query.ack_received());
    assert!(recording.answers.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn logout_is_answered_by_its_ack() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "log out",
        courier_tl::functions::auth::LogOut.to_bytes(),
        QueryPolicy::login(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query, dc, ExecOption::Logout).await;

    let (msg_id, _) = peer.recv().await;
    peer.send_ack(vec![msg_id]);
    settle().await;

    // the server never sends a result for a logout; the ack synthesizes a
    // boolTrue answer
    let answers = recording.answers.lock().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(
        u32::from_le_bytes(answers[0][..4].try_into().unwrap()),
        ID_BOOL_TRUE
    );
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_errors_surface_once() {
    let (ua, dc, mut peer, _factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "bad input",
        vec![0u8; 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query, dc, ExecOption::Default).await;

    let (msg_id, _) = peer.recv().await;
    peer.send_rpc_error(msg_id, 400, "PEER_ID_INVALID");
    settle().await;

    let errors = recording.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], (400, "PEER_ID_INVALID".to_string()));
    assert!(recording.answers.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_agent_fails_queries_locally() {
    let factory = LoopbackFactory::new();
    let config = Config {
        state_backend: Arc::new(InMemoryBackend::new()),
        connection_factory: factory,
        ..Config::default()
    };
    let ua = UserAgent::new(config);
    // never set online

    let recording = Arc::new(Recording::default());
    let query = Query::new(
        "too early",
        vec![0u8; 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    let dc = ua.working_dc();
    ua.execute(query, dc, ExecOption::Default).await;

    let errors = recording.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 600);
    assert_eq!(errors[0].1, "NOT_CONNECTED");
}

#[tokio::test(start_paused = true)]
async fn inbound_content_messages_get_acked() {
    let (_ua, _dc, mut peer, _factory) = established_agent().await;

    // a content-related (odd seq) server push must be acknowledged
    let mut plain_body = Vec::new();
    0xdeadbeefu32.serialize(&mut plain_body); // some unknown update frame

    let mut plain = Vec::new();
    plain.extend(0i64.to_le_bytes());
    plain.extend(peer.session_id.to_le_bytes());
    plain.extend(0x123456780i64.to_le_bytes());
    plain.extend(1i32.to_le_bytes()); // odd seq: needs ack
    plain.extend((plain_body.len() as u32).to_le_bytes());
    plain.extend_from_slice(&plain_body);

    let msg_key = crypto::calc_msg_key(&plain);
    while plain.len() % 16 != 0 {
        plain.push(0);
    }
    let (aes_key, aes_iv) = crypto::calc_key(peer.key.data(), &msg_key, Side::Server);
    courier_crypto::aes::ige_encrypt(&mut plain, &aes_key, &aes_iv);
    let mut frame = Vec::new();
    frame.extend_from_slice(&peer.key.key_id());
    frame.extend_from_slice(&msg_key);
    frame.extend_from_slice(&plain);
    peer.inner.to_client.send(frame).unwrap();

    // the ack-flush timer batches and sends a msgs_ack container
    tokio::time::sleep(Duration::from_secs(1)).await;
    let (_, body) = peer.recv().await;
    assert_eq!(u32::from_le_bytes(body[..4].try_into().unwrap()), ID_MSGS_ACK);
    let acked = <Vec<i64> as courier_tl::Deserializable>::from_bytes(&body[4..]).unwrap();
    assert_eq!(acked, vec![0x123456780]);
}

#[tokio::test(start_paused = true)]
async fn idle_non_working_dc_closes_its_session() {
    let (ua, _dc, _peer, _factory) = established_agent().await;

    // DC 3 is not the working DC; give it a session and let it idle
    let factory = LoopbackFactory::new();
    let conn = factory.open("149.154.175.100:443").await.unwrap();
    let key = test_auth_key();
    let dc3 = ua.dc_by_id(3);
    dc3.set_perm_key(Some(key.clone()));
    dc3.set_state(DcState::Configured);
    ua.adopt_session(&dc3, SessionHandle::new(Session::new(key, 0, 0), conn));
    assert!(dc3.session().is_some());

    dc3.schedule_cleanup(&ua);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(dc3.session().is_none(), "cleanup timer closes the idle session");

    // the working DC is exempt
    let working = ua.working_dc();
    working.schedule_cleanup(&ua);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(working.session().is_some());
}

#[tokio::test(start_paused = true)]
async fn disconnect_replays_inflight_queries_on_the_next_session() {
    let (ua, dc, mut peer, factory) = established_agent().await;
    let recording = Arc::new(Recording::default());

    let query = Query::new(
        "inflight",
        vec![3u8; 4],
        QueryPolicy::default(),
        Box::new(RecordingHandler(recording.clone())),
    );
    ua.execute(query, dc.clone(), ExecOption::Default).await;
    let _ = peer.recv().await;

    // server vanishes; the working DC reconnects with its saved key and
    // the in-flight query goes out again — with no error callback
    drop(peer);
    settle().await;
    assert!(recording.errors.lock().unwrap().is_empty());

    let endpoint = loop {
        if let Some(endpoint) = factory.endpoints().pop() {
            break endpoint;
        }
        settle().await;
    };
    let mut reconnect = Peer { inner: endpoint, key: test_auth_key(), session_id: 0, seq: 2 };
    // the new session sends initConnection first, then the replayed query
    let mut seen_replay = false;
    for _ in 0..2 {
        let (_, body) = reconnect.recv().await;
        if body == vec![3u8; 4] {
            seen_replay = true;
        }
    }
    assert!(seen_replay, "in-flight query was replayed on the fresh session");
}
