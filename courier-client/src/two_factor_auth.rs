//! The 2FA password flow: fetch the salt, hash, submit
//! `auth.checkPassword`, then resume whatever query hit
//! `SESSION_PASSWORD_NEEDED`.

use std::sync::Arc;

use courier_tl::Serializable;
use sha2::{Digest, Sha256};

use crate::callback::ValueKind;
use crate::query::{Query, QueryHandler, QueryPolicy};
use crate::{ExecOption, UserAgent};

/// `SHA256(salt ‖ password ‖ salt)` — the password hash this layer
/// submits.
pub fn password_hash(salt: &[u8], password: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    hasher.update(salt);
    hasher.finalize().to_vec()
}

impl UserAgent {
    /// Kick off the password flow for a query that needs it. Only one flow
    /// runs at a time; concurrent triggers are coalesced.
    pub(crate) fn begin_password_check(&self, blocked: Arc<Query>) {
        if self.lock_password_flow() {
            // a flow is already running; the blocked query retries after it
            return;
        }

        let request = courier_tl::functions::account::GetPassword;
        let query = Query::new(
            "get password",
            request.to_bytes(),
            QueryPolicy::login(),
            Box::new(GetPasswordHandler { blocked }),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Login).await;
        });
    }
}

struct GetPasswordHandler {
    blocked: Arc<Query>,
}

impl QueryHandler for GetPasswordHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::account::Password;
        use courier_tl::Deserializable;

        let salt = match Password::from_bytes(body) {
            Ok(Password::Password { current_salt, new_salt: _, hint }) => {
                log::info!("[2fa] password required (hint: {hint:?})");
                current_salt
            }
            Ok(Password::NoPassword { .. }) => {
                log::warn!("[2fa] server says no password is set");
                ua.unlock_password_flow();
                return;
            }
            Err(e) => {
                log::warn!("[2fa] bad getPassword answer: {e}");
                ua.unlock_password_flow();
                return;
            }
        };

        let ua2 = ua.clone();
        let blocked = self.blocked.clone();
        ua.sink().get_values(
            ValueKind::Password,
            "two-factor password",
            1,
            Box::new(move |values| {
                let Some(password) = values.into_iter().next() else {
                    ua2.unlock_password_flow();
                    ua2.sink().login_failed();
                    return;
                };
                let request = courier_tl::functions::auth::CheckPassword {
                    password_hash: password_hash(&salt, password.as_bytes()),
                };
                let query = Query::new(
                    "check password",
                    request.to_bytes(),
                    QueryPolicy::login(),
                    Box::new(CheckPasswordHandler { blocked }),
                );
                let ua3 = ua2.clone();
                tokio::spawn(async move {
                    let dc = ua3.working_dc();
                    ua3.execute(query, dc, ExecOption::Login).await;
                });
            }),
        );
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[2fa] getPassword failed: {code} {text}");
        ua.unlock_password_flow();
        ua.sink().login_failed();
    }
}

struct CheckPasswordHandler {
    blocked: Arc<Query>,
}

impl QueryHandler for CheckPasswordHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::auth::Authorization;
        use courier_tl::Deserializable;

        ua.unlock_password_flow();
        match Authorization::from_bytes(body) {
            Ok(Authorization::Authorization { user }) => {
                ua.finish_login(&user);
                // the original query can go out again now
                ua.arm_retry(&self.blocked, 0.0);
            }
            Err(e) => {
                log::warn!("[2fa] bad checkPassword answer: {e}");
                ua.sink().login_failed();
            }
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[2fa] checkPassword failed: {code} {text}");
        ua.unlock_password_flow();
        ua.sink().login_failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salt_sandwiched() {
        let manual = {
            let mut hasher = Sha256::new();
            hasher.update(b"salt");
            hasher.update(b"hunter2");
            hasher.update(b"salt");
            hasher.finalize().to_vec()
        };
        assert_eq!(password_hash(b"salt", b"hunter2"), manual);
        assert_eq!(password_hash(b"salt", b"hunter2").len(), 32);
    }

    #[test]
    fn hash_depends_on_salt() {
        let a = password_hash(b"salt-a", b"pw");
        let b = password_hash(b"salt-b", b"pw");
        assert_ne!(a, b);
    }
}
