//! Sans-IO auth-key generation.
//!
//! The same four-step exchange creates both permanent and temporary (PFS)
//! keys; the only difference is which `p_q_inner_data` variant step 2
//! encrypts.
//!
//! ```text
//! let (req, s1) = authentication::step1(KeyScope::Permanent)?;
//! // send req, receive resp
//! let (req, s2) = authentication::step2(s1, resp)?;
//! // send req, receive resp
//! let (req, s3) = authentication::step3(s2, resp)?;
//! // send req, receive resp
//! let done = authentication::finish(s3, resp)?;
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use courier_crypto::{aes, dh, factorize, generate_key_data_from_nonce, rsa, AuthKey};
use courier_tl::mtproto::{
    ClientDhInnerData, PqInnerData, ReqDhParams, ReqPqMulti, ResPq, ServerDhInnerData,
    ServerDhParams, SetClientDhParams, SetClientDhParamsAnswer,
};
use courier_tl::{Cursor, Deserializable, Serializable};
use num_bigint::BigUint;
use sha1::{Digest, Sha1};

// ─── Error ────────────────────────────────────────────────────────────────────

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce,
    InvalidServerNonce,
    InvalidPqSize { size: usize },
    UnknownFingerprints { fingerprints: Vec<i64> },
    DhParamsFail,
    EncryptedAnswerNotPadded { len: usize },
    InvalidDhInnerData,
    BadDhParams(dh::DhError),
    InvalidAnswerHash,
    InvalidNewNonceHash,
    DhGenRetry,
    DhGenFail,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce => write!(f, "nonce mismatch"),
            Self::InvalidServerNonce => write!(f, "server_nonce mismatch"),
            Self::InvalidPqSize { size } => write!(f, "pq size {size} (expected 8)"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known RSA fingerprint among {fingerprints:?}")
            }
            Self::DhParamsFail => write!(f, "server refused DH params"),
            Self::EncryptedAnswerNotPadded { len } => {
                write!(f, "encrypted answer length {len} not 16-aligned")
            }
            Self::InvalidDhInnerData => write!(f, "malformed server DH inner data"),
            Self::BadDhParams(e) => write!(f, "DH parameter check failed: {e}"),
            Self::InvalidAnswerHash => write!(f, "answer hash mismatch"),
            Self::InvalidNewNonceHash => write!(f, "new-nonce hash mismatch"),
            Self::DhGenRetry => write!(f, "server asked to retry DH"),
            Self::DhGenFail => write!(f, "server failed DH"),
        }
    }
}

impl From<dh::DhError> for Error {
    fn from(e: dh::DhError) -> Self {
        Self::BadDhParams(e)
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// Whether this handshake creates the permanent key or a PFS temp key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyScope {
    Permanent,
    /// Temporary key with the given lifetime in seconds.
    Temp { expires_in: i32 },
}

pub struct Step1 {
    scope: KeyScope,
    nonce: [u8; 16],
}

#[derive(Debug)]
pub struct Step2 {
    scope: KeyScope,
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
    time_offset: i32,
}

/// The output of a completed handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key: [u8; 256],
    pub time_offset: i32,
    pub first_salt: i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

pub fn step1(scope: KeyScope) -> Result<(ReqPqMulti, Step1), Error> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).expect("system rng unavailable");
    Ok((ReqPqMulti { nonce }, Step1 { scope, nonce }))
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

pub fn step2(state: Step1, response: ResPq) -> Result<(ReqDhParams, Step2), Error> {
    let mut random = [0u8; 288];
    getrandom::getrandom(&mut random).expect("system rng unavailable");
    do_step2(state, response, &random)
}

fn do_step2(state: Step1, response: ResPq, random: &[u8; 288]) -> Result<(ReqDhParams, Step2), Error> {
    let Step1 { scope, nonce } = state;
    let ResPq::ResPq(res_pq) = response;

    if res_pq.nonce != nonce {
        return Err(Error::InvalidNonce);
    }
    if res_pq.pq.len() != 8 {
        return Err(Error::InvalidPqSize { size: res_pq.pq.len() });
    }

    let pq = u64::from_be_bytes(res_pq.pq.as_slice().try_into().unwrap());
    let (p, q) = factorize(pq);

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let inner = match scope {
        KeyScope::Permanent => PqInnerData::Permanent {
            pq: res_pq.pq.clone(),
            p: p_bytes.clone(),
            q: q_bytes.clone(),
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
        },
        KeyScope::Temp { expires_in } => PqInnerData::Temp {
            pq: res_pq.pq.clone(),
            p: p_bytes.clone(),
            q: q_bytes.clone(),
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
            expires_in,
        },
    }
    .to_bytes();

    let fingerprint = res_pq
        .server_public_key_fingerprints
        .iter()
        .copied()
        .find(|&fp| key_for_fingerprint(fp).is_some())
        .ok_or_else(|| Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        })?;
    let key = key_for_fingerprint(fingerprint).unwrap();
    let encrypted_data = rsa::encrypt_hashed(&inner, &key, &random[32..]);

    Ok((
        ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: fingerprint,
            encrypted_data,
        },
        Step2 { scope, nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

fn trim_be(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

pub fn step3(state: Step2, response: ServerDhParams) -> Result<(SetClientDhParams, Step3), Error> {
    let mut random = [0u8; 272];
    getrandom::getrandom(&mut random).expect("system rng unavailable");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i32;
    do_step3(state, response, &random, now)
}

fn do_step3(
    state: Step2,
    response: ServerDhParams,
    random: &[u8; 272],
    now: i32,
) -> Result<(SetClientDhParams, Step3), Error> {
    let Step2 { scope: _, nonce, server_nonce, new_nonce } = state;

    let mut server_dh = match response {
        ServerDhParams::Fail(fail) => {
            if fail.nonce != nonce {
                return Err(Error::InvalidNonce);
            }
            if fail.server_nonce != server_nonce {
                return Err(Error::InvalidServerNonce);
            }
            // the failure notice itself must authenticate our new_nonce
            let digest: [u8; 20] = Sha1::digest(new_nonce).into();
            if fail.new_nonce_hash[..] != digest[4..] {
                return Err(Error::InvalidNewNonceHash);
            }
            return Err(Error::DhParamsFail);
        }
        ServerDhParams::Ok(ok) => ok,
    };

    if server_dh.nonce != nonce {
        return Err(Error::InvalidNonce);
    }
    if server_dh.server_nonce != server_nonce {
        return Err(Error::InvalidServerNonce);
    }
    if server_dh.encrypted_answer.len() % 16 != 0 {
        return Err(Error::EncryptedAnswerNotPadded { len: server_dh.encrypted_answer.len() });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut server_dh.encrypted_answer, &key, &iv);
    let plain = server_dh.encrypted_answer;
    if plain.len() < 20 {
        return Err(Error::InvalidDhInnerData);
    }

    let answer_hash: [u8; 20] = plain[..20].try_into().unwrap();
    let mut cursor = Cursor::from_slice(&plain[20..]);
    let inner =
        ServerDhInnerData::deserialize(&mut cursor).map_err(|_| Error::InvalidDhInnerData)?;

    let expected_hash: [u8; 20] = Sha1::digest(&plain[20..20 + cursor.pos()]).into();
    if answer_hash != expected_hash {
        return Err(Error::InvalidAnswerHash);
    }
    if inner.nonce != nonce {
        return Err(Error::InvalidNonce);
    }
    if inner.server_nonce != server_nonce {
        return Err(Error::InvalidServerNonce);
    }

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let g = BigUint::from(inner.g.max(0) as u32);
    let time_offset = inner.server_time - now;

    dh::check_dh_params(&dh_prime, inner.g)?;
    dh::check_g_a(&dh_prime, &g_a)?;

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);
    dh::check_g_a(&dh_prime, &g_b)?;

    let client_inner = ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    }
    .to_bytes();

    let digest: [u8; 20] = Sha1::digest(&client_inner).into();
    let pad_len = (16 - (20 + client_inner.len()) % 16) % 16;

    let mut payload = Vec::with_capacity(20 + client_inner.len() + pad_len);
    payload.extend_from_slice(&digest);
    payload.extend_from_slice(&client_inner);
    payload.extend_from_slice(&random[256..256 + pad_len]);

    aes::ige_encrypt(&mut payload, &key, &iv);

    Ok((
        SetClientDhParams { nonce, server_nonce, encrypted_data: payload },
        Step3 { nonce, server_nonce, new_nonce, gab, time_offset },
    ))
}

// ─── finish ──────────────────────────────────────────────────────────────────

pub fn finish(state: Step3, response: SetClientDhParamsAnswer) -> Result<Finished, Error> {
    let Step3 { nonce, server_nonce, new_nonce, gab, time_offset } = state;

    let (data, number) = match &response {
        SetClientDhParamsAnswer::Ok(d) => (d, 1u8),
        SetClientDhParamsAnswer::Retry(d) => (d, 2),
        SetClientDhParamsAnswer::Fail(d) => (d, 3),
    };
    if data.nonce != nonce {
        return Err(Error::InvalidNonce);
    }
    if data.server_nonce != server_nonce {
        return Err(Error::InvalidServerNonce);
    }

    let mut key_bytes = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    key_bytes[256 - gab_bytes.len()..].copy_from_slice(&gab_bytes);
    let auth_key = AuthKey::from_bytes(key_bytes);

    if data.new_nonce_hash != auth_key.calc_new_nonce_hash(&new_nonce, number) {
        return Err(Error::InvalidNewNonceHash);
    }

    match number {
        1 => {
            let mut salt = [0u8; 8];
            for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
                *dst = a ^ b;
            }
            Ok(Finished {
                auth_key: auth_key.to_bytes(),
                time_offset,
                first_salt: i64::from_le_bytes(salt),
            })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ─── Server RSA keys ─────────────────────────────────────────────────────────

/// Known server RSA keys by fingerprint (production and test DCs).
#[allow(clippy::unreadable_literal)]
pub fn key_for_fingerprint(fingerprint: i64) -> Option<rsa::Key> {
    Some(match fingerprint {
        -3414540481677951611 => rsa::Key::new(
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            "65537",
        )?,
        -5595554452916591101 => rsa::Key::new(
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            "65537",
        )?,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_tl::mtproto::ResPqData;

    #[test]
    fn step2_rejects_a_foreign_nonce() {
        let (_, s1) = step1(KeyScope::Permanent).unwrap();
        let response = ResPq::ResPq(ResPqData {
            nonce: [0xff; 16],
            server_nonce: [1; 16],
            pq: vec![0, 0, 0, 0, 0, 0, 0, 2],
            server_public_key_fingerprints: vec![-3414540481677951611],
        });
        assert!(matches!(step2(s1, response), Err(Error::InvalidNonce)));
    }

    #[test]
    fn step2_factors_and_frames_the_request() {
        let (req1, s1) = step1(KeyScope::Permanent).unwrap();
        let pq = 1724114033281923457u64;
        let response = ResPq::ResPq(ResPqData {
            nonce: req1.nonce,
            server_nonce: [7; 16],
            pq: pq.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![0, -3414540481677951611],
        });
        let (req2, _s2) = step2(s1, response).unwrap();
        assert_eq!(req2.p, 1229739323u64.to_be_bytes()[4..].to_vec());
        assert_eq!(req2.q, 1402015859u64.to_be_bytes()[4..].to_vec());
        assert_eq!(req2.public_key_fingerprint, -3414540481677951611);
        assert_eq!(req2.encrypted_data.len(), 256);
    }

    #[test]
    fn step2_requires_a_known_fingerprint() {
        let (req1, s1) = step1(KeyScope::Temp { expires_in: 3600 }).unwrap();
        let response = ResPq::ResPq(ResPqData {
            nonce: req1.nonce,
            server_nonce: [7; 16],
            pq: 6u64.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![42],
        });
        assert!(matches!(
            step2(s1, response).unwrap_err(),
            Error::UnknownFingerprints { .. }
        ));
    }
}
