//! Service-level MTProto constructors: the auth-key handshake, acks, pings
//! and the envelope ids the session demultiplexes on.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, RemoteCall, Serializable};

// ─── Envelope constructor ids ────────────────────────────────────────────────

pub const ID_RPC_RESULT: u32 = 0xf35c6d01;
pub const ID_RPC_ERROR: u32 = 0x2144ca19;
pub const ID_MSG_CONTAINER: u32 = 0x73f1f8dc;
pub const ID_GZIP_PACKED: u32 = 0x3072cfa1;
pub const ID_PONG: u32 = 0x347773c5;
pub const ID_MSGS_ACK: u32 = 0x62d6b459;
pub const ID_BAD_SERVER_SALT: u32 = 0xedab447b;
pub const ID_BAD_MSG_NOTIFICATION: u32 = 0xa7eff811;
pub const ID_NEW_SESSION_CREATED: u32 = 0x9ec20908;
pub const ID_BOOL_TRUE: u32 = 0x997275b5;
pub const ID_BOOL_FALSE: u32 = 0xbc799737;

// ─── Handshake functions ─────────────────────────────────────────────────────

/// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ`
pub struct ReqPqMulti {
    pub nonce: [u8; 16],
}

impl Identifiable for ReqPqMulti {
    const CONSTRUCTOR_ID: u32 = 0xbe7e8ef1;
}

impl Serializable for ReqPqMulti {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
    }
}

impl RemoteCall for ReqPqMulti {
    type Return = ResPq;
}

/// `req_DH_params#d712e4be nonce:int128 server_nonce:int128 p:bytes q:bytes
/// public_key_fingerprint:long encrypted_data:bytes = Server_DH_Params`
#[derive(Debug)]
pub struct ReqDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub public_key_fingerprint: i64,
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for ReqDhParams {
    const CONSTRUCTOR_ID: u32 = 0xd712e4be;
}

impl Serializable for ReqDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.p.serialize(buf);
        self.q.serialize(buf);
        self.public_key_fingerprint.serialize(buf);
        self.encrypted_data.serialize(buf);
    }
}

impl RemoteCall for ReqDhParams {
    type Return = ServerDhParams;
}

/// `set_client_DH_params#f5045f1f nonce:int128 server_nonce:int128
/// encrypted_data:bytes = Set_client_DH_params_answer`
pub struct SetClientDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for SetClientDhParams {
    const CONSTRUCTOR_ID: u32 = 0xf5045f1f;
}

impl Serializable for SetClientDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.encrypted_data.serialize(buf);
    }
}

impl RemoteCall for SetClientDhParams {
    type Return = SetClientDhParamsAnswer;
}

/// `msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck`
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}

impl Identifiable for MsgsAck {
    const CONSTRUCTOR_ID: u32 = ID_MSGS_ACK;
}

impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_ids.serialize(buf);
    }
}

/// `ping#7abe77ec ping_id:long = Pong`
pub struct Ping {
    pub ping_id: i64,
}

impl Identifiable for Ping {
    const CONSTRUCTOR_ID: u32 = 0x7abe77ec;
}

impl Serializable for Ping {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl RemoteCall for Ping {
    type Return = Pong;
}

// ─── Handshake types ─────────────────────────────────────────────────────────

/// `resPQ#05162463`
pub struct ResPqData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub pq: Vec<u8>,
    pub server_public_key_fingerprints: Vec<i64>,
}

pub enum ResPq {
    ResPq(ResPqData),
}

impl Deserializable for ResPq {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x05162463 => Ok(Self::ResPq(ResPqData {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                pq: Vec::<u8>::deserialize(buf)?,
                server_public_key_fingerprints: Vec::<i64>::deserialize(buf)?,
            })),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `p_q_inner_data#83c95aec` and its `_temp` variant for PFS keys.
pub enum PqInnerData {
    Permanent {
        pq: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
    },
    Temp {
        pq: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
        expires_in: i32,
    },
}

impl Serializable for PqInnerData {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            Self::Permanent { pq, p, q, nonce, server_nonce, new_nonce } => {
                0x83c95aecu32.serialize(buf);
                pq.serialize(buf);
                p.serialize(buf);
                q.serialize(buf);
                nonce.serialize(buf);
                server_nonce.serialize(buf);
                new_nonce.serialize(buf);
            }
            Self::Temp { pq, p, q, nonce, server_nonce, new_nonce, expires_in } => {
                0x3c6a84d4u32.serialize(buf);
                pq.serialize(buf);
                p.serialize(buf);
                q.serialize(buf);
                nonce.serialize(buf);
                server_nonce.serialize(buf);
                new_nonce.serialize(buf);
                expires_in.serialize(buf);
            }
        }
    }
}

pub struct ServerDhParamsOkData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_answer: Vec<u8>,
}

pub struct ServerDhParamsFailData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash: [u8; 16],
}

pub enum ServerDhParams {
    Ok(ServerDhParamsOkData),
    Fail(ServerDhParamsFailData),
}

impl Deserializable for ServerDhParams {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0xd0e8075c => Ok(Self::Ok(ServerDhParamsOkData {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                encrypted_answer: Vec::<u8>::deserialize(buf)?,
            })),
            0x79cb045d => Ok(Self::Fail(ServerDhParamsFailData {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                new_nonce_hash: <[u8; 16]>::deserialize(buf)?,
            })),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `server_DH_inner_data#b5890dba`
pub struct ServerDhInnerData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub g: i32,
    pub dh_prime: Vec<u8>,
    pub g_a: Vec<u8>,
    pub server_time: i32,
}

impl Deserializable for ServerDhInnerData {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0xb5890dba => Ok(Self {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                g: i32::deserialize(buf)?,
                dh_prime: Vec::<u8>::deserialize(buf)?,
                g_a: Vec::<u8>::deserialize(buf)?,
                server_time: i32::deserialize(buf)?,
            }),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `client_DH_inner_data#6643b654`
pub struct ClientDhInnerData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub retry_id: i64,
    pub g_b: Vec<u8>,
}

impl Serializable for ClientDhInnerData {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        0x6643b654u32.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.retry_id.serialize(buf);
        self.g_b.serialize(buf);
    }
}

pub struct DhGenData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash: [u8; 16],
}

pub enum SetClientDhParamsAnswer {
    Ok(DhGenData),
    Retry(DhGenData),
    Fail(DhGenData),
}

impl Deserializable for SetClientDhParamsAnswer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        let data = DhGenData {
            nonce: <[u8; 16]>::deserialize(buf)?,
            server_nonce: <[u8; 16]>::deserialize(buf)?,
            new_nonce_hash: <[u8; 16]>::deserialize(buf)?,
        };
        match id {
            0x3bcbf734 => Ok(Self::Ok(data)),
            0x46dc1fb9 => Ok(Self::Retry(data)),
            0xa69dae02 => Ok(Self::Fail(data)),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `bind_auth_key_inner#75a3f765` — the payload encrypted under the *temp*
/// key when binding it to the permanent one.
pub struct BindAuthKeyInner {
    pub nonce: i64,
    pub temp_auth_key_id: i64,
    pub perm_auth_key_id: i64,
    pub temp_session_id: i64,
    pub expires_at: i32,
}

impl Serializable for BindAuthKeyInner {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        0x75a3f765u32.serialize(buf);
        self.nonce.serialize(buf);
        self.temp_auth_key_id.serialize(buf);
        self.perm_auth_key_id.serialize(buf);
        self.temp_session_id.serialize(buf);
        self.expires_at.serialize(buf);
    }
}

/// `pong#347773c5 msg_id:long ping_id:long = Pong`
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}

impl Deserializable for Pong {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            ID_PONG => Ok(Self {
                msg_id: i64::deserialize(buf)?,
                ping_id: i64::deserialize(buf)?,
            }),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_pq_layout() {
        let req = ReqPqMulti { nonce: [9; 16] };
        let wire = req.to_bytes();
        assert_eq!(wire.len(), 4 + 16);
        assert_eq!(&wire[..4], &ReqPqMulti::CONSTRUCTOR_ID.to_le_bytes());
        assert_eq!(&wire[4..], &[9u8; 16]);
    }

    #[test]
    fn dh_gen_variants_share_the_body() {
        let mut wire = Vec::new();
        0x46dc1fb9u32.serialize(&mut wire);
        [1u8; 16].serialize(&mut wire);
        [2u8; 16].serialize(&mut wire);
        [3u8; 16].serialize(&mut wire);
        match SetClientDhParamsAnswer::from_bytes(&wire).unwrap() {
            SetClientDhParamsAnswer::Retry(d) => assert_eq!(d.new_nonce_hash, [3u8; 16]),
            _ => panic!("expected retry"),
        }
    }
}
