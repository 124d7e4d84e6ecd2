//! Persisted protocol state: per-DC keys and addresses, secret-chat
//! records, and the global cursors. Pluggable behind [`StateBackend`];
//! the default is a compact binary file.

use std::io;
use std::path::PathBuf;

use crate::dc::DcAddress;
use crate::secret_chat::SecretChatState;

const STATE_MAGIC: u32 = 0x43525354; // "CRST"
const STATE_VERSION: u8 = 1;

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct DcRecord {
    pub id: i32,
    pub addresses: Vec<DcAddress>,
    pub auth_key: Option<[u8; 256]>,
    pub temp_auth_key: Option<[u8; 256]>,
    pub temp_expires_at: i32,
    pub server_salt: i64,
    pub server_time_delta: i32,
    pub logged_in: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SecretChatRecord {
    pub id: i32,
    pub access_hash: i64,
    pub state: SecretChatState,
    pub admin_id: i32,
    pub participant_id: i32,
    pub key: [u8; 256],
    pub key_fingerprint: i64,
    pub in_seq_no: i32,
    pub out_seq_no: i32,
    pub layer: i32,
    pub ttl: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedState {
    pub our_id: i32,
    pub working_dc_id: i32,
    pub pts: i32,
    pub qts: i32,
    pub seq: i32,
    pub date: i32,
    pub dcs: Vec<DcRecord>,
    pub secret_chats: Vec<SecretChatRecord>,
}

impl Default for DcRecord {
    fn default() -> Self {
        Self {
            id: 0,
            addresses: Vec::new(),
            auth_key: None,
            temp_auth_key: None,
            temp_expires_at: 0,
            server_salt: 0,
            server_time_delta: 0,
            logged_in: false,
        }
    }
}

// ─── Backend trait ───────────────────────────────────────────────────────────

/// Where the protocol state is persisted between runs.
pub trait StateBackend: Send + Sync {
    fn save(&self, state: &PersistedState) -> io::Result<()>;
    fn load(&self) -> io::Result<Option<PersistedState>>;
    /// Remove the stored state (sign-out).
    fn delete(&self) -> io::Result<()>;
    /// Name for log messages.
    fn name(&self) -> &str;
}

// ─── Binary file backend ─────────────────────────────────────────────────────

pub struct BinaryFileBackend {
    path: PathBuf,
}

impl BinaryFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateBackend for BinaryFileBackend {
    fn save(&self, state: &PersistedState) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("state.tmp");
        std::fs::write(&tmp, encode(state))?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<PersistedState>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        decode(&bytes)
            .map(Some)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "corrupt state file"))
    }

    fn delete(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "binary-file"
    }
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// Stores nothing on disk. Tests and always-fresh tools use this.
#[derive(Default)]
pub struct InMemoryBackend {
    state: std::sync::Mutex<Option<PersistedState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for InMemoryBackend {
    fn save(&self, state: &PersistedState) -> io::Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<PersistedState>> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn delete(&self) -> io::Result<()> {
        *self.state.lock().unwrap() = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

// ─── Codec ───────────────────────────────────────────────────────────────────

struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn i32(&mut self, v: i32) {
        self.0.extend(v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.0.extend(v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.i32(v.len() as i32);
        self.0.extend_from_slice(v);
    }
    fn opt_key(&mut self, key: &Option<[u8; 256]>) {
        match key {
            Some(k) => {
                self.u8(1);
                self.0.extend_from_slice(k);
            }
            None => self.u8(0),
        }
    }
}

fn encode(state: &PersistedState) -> Vec<u8> {
    let mut w = Writer(Vec::new());
    w.0.extend(STATE_MAGIC.to_le_bytes());
    w.u8(STATE_VERSION);
    w.i32(state.our_id);
    w.i32(state.working_dc_id);
    w.i32(state.pts);
    w.i32(state.qts);
    w.i32(state.seq);
    w.i32(state.date);

    w.i32(state.dcs.len() as i32);
    for dc in &state.dcs {
        w.i32(dc.id);
        w.i32(dc.addresses.len() as i32);
        for addr in &dc.addresses {
            w.bytes(addr.ip.as_bytes());
            w.i32(addr.port);
            w.u8(u8::from(addr.ipv6) | (u8::from(addr.media_only) << 1));
        }
        w.opt_key(&dc.auth_key);
        w.opt_key(&dc.temp_auth_key);
        w.i32(dc.temp_expires_at);
        w.i64(dc.server_salt);
        w.i32(dc.server_time_delta);
        w.u8(u8::from(dc.logged_in));
    }

    w.i32(state.secret_chats.len() as i32);
    for chat in &state.secret_chats {
        w.i32(chat.id);
        w.i64(chat.access_hash);
        w.u8(chat.state.to_wire());
        w.i32(chat.admin_id);
        w.i32(chat.participant_id);
        w.0.extend_from_slice(&chat.key);
        w.i64(chat.key_fingerprint);
        w.i32(chat.in_seq_no);
        w.i32(chat.out_seq_no);
        w.i32(chat.layer);
        w.i32(chat.ttl);
    }
    w.0
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
    fn u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }
    fn i32(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn string(&mut self) -> Option<String> {
        let len = self.i32()?;
        if !(0..=65536).contains(&len) {
            return None;
        }
        let bytes = self.take(len as usize)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
    fn key(&mut self) -> Option<[u8; 256]> {
        let mut key = [0u8; 256];
        key.copy_from_slice(self.take(256)?);
        Some(key)
    }
    fn opt_key(&mut self) -> Option<Option<[u8; 256]>> {
        match self.u8()? {
            0 => Some(None),
            _ => Some(Some(self.key()?)),
        }
    }
}

fn decode(bytes: &[u8]) -> Option<PersistedState> {
    let mut r = Reader { buf: bytes, pos: 0 };
    if r.i32()? as u32 != STATE_MAGIC || r.u8()? != STATE_VERSION {
        return None;
    }

    let mut state = PersistedState {
        our_id: r.i32()?,
        working_dc_id: r.i32()?,
        pts: r.i32()?,
        qts: r.i32()?,
        seq: r.i32()?,
        date: r.i32()?,
        dcs: Vec::new(),
        secret_chats: Vec::new(),
    };

    let dc_count = r.i32()?;
    if !(0..=1000).contains(&dc_count) {
        return None;
    }
    for _ in 0..dc_count {
        let id = r.i32()?;
        let addr_count = r.i32()?;
        if !(0..=64).contains(&addr_count) {
            return None;
        }
        let mut addresses = Vec::with_capacity(addr_count as usize);
        for _ in 0..addr_count {
            let ip = r.string()?;
            let port = r.i32()?;
            let flags = r.u8()?;
            addresses.push(DcAddress {
                ip,
                port,
                ipv6: flags & 1 != 0,
                media_only: flags & 2 != 0,
            });
        }
        state.dcs.push(DcRecord {
            id,
            addresses,
            auth_key: r.opt_key()?,
            temp_auth_key: r.opt_key()?,
            temp_expires_at: r.i32()?,
            server_salt: r.i64()?,
            server_time_delta: r.i32()?,
            logged_in: r.u8()? != 0,
        });
    }

    let chat_count = r.i32()?;
    if !(0..=100_000).contains(&chat_count) {
        return None;
    }
    for _ in 0..chat_count {
        state.secret_chats.push(SecretChatRecord {
            id: r.i32()?,
            access_hash: r.i64()?,
            state: SecretChatState::from_wire(r.u8()?),
            admin_id: r.i32()?,
            participant_id: r.i32()?,
            key: r.key()?,
            key_fingerprint: r.i64()?,
            in_seq_no: r.i32()?,
            out_seq_no: r.i32()?,
            layer: r.i32()?,
            ttl: r.i32()?,
        });
    }

    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PersistedState {
        PersistedState {
            our_id: 777,
            working_dc_id: 2,
            pts: 1000,
            qts: 12,
            seq: 5,
            date: 1_700_000_000,
            dcs: vec![
                DcRecord {
                    id: 2,
                    addresses: vec![DcAddress {
                        ip: "10.0.0.2".into(),
                        port: 443,
                        ipv6: false,
                        media_only: false,
                    }],
                    auth_key: Some([7u8; 256]),
                    temp_auth_key: None,
                    temp_expires_at: 0,
                    server_salt: -5,
                    server_time_delta: 3,
                    logged_in: true,
                },
                DcRecord { id: 4, ..Default::default() },
            ],
            secret_chats: vec![SecretChatRecord {
                id: 42,
                access_hash: 0x1234,
                state: SecretChatState::Ok,
                admin_id: 777,
                participant_id: 888,
                key: [9u8; 256],
                key_fingerprint: -77,
                in_seq_no: 3,
                out_seq_no: 8,
                layer: 46,
                ttl: 60,
            }],
        }
    }

    #[test]
    fn binary_round_trip() {
        let state = sample_state();
        assert_eq!(decode(&encode(&state)), Some(state));
    }

    #[test]
    fn file_backend_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("courier-state-{}.bin", std::process::id()));
        let backend = BinaryFileBackend::new(&path);

        assert!(backend.load().unwrap().is_none());
        backend.save(&sample_state()).unwrap();
        assert_eq!(backend.load().unwrap(), Some(sample_state()));
        backend.delete().unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        assert!(decode(b"not a state file").is_none());
        let mut bytes = encode(&sample_state());
        bytes.truncate(bytes.len() - 3);
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn in_memory_backend() {
        let backend = InMemoryBackend::new();
        backend.save(&sample_state()).unwrap();
        assert_eq!(backend.load().unwrap(), Some(sample_state()));
        backend.delete().unwrap();
        assert!(backend.load().unwrap().is_none());
    }
}
