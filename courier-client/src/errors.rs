//! Error types shared across the client core.

use std::{fmt, io};

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error the server returned for one RPC call.
///
/// Numeric suffixes are stripped from the name into [`RpcError::value`]:
/// `FLOOD_WAIT_12` → `{ code: 420, name: "FLOOD_WAIT", value: Some(12) }`.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub name: String,
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " ({v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    pub fn from_server(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(value) = suffix.parse::<u32>() {
                    return Self {
                        code,
                        name: message[..idx].to_string(),
                        value: Some(value),
                    };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match the error name, with an optional `*` prefix or suffix wildcard.
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Seconds to wait if this is a flood error.
    pub fn flood_wait_seconds(&self) -> Option<u32> {
        if self.code == 420 && self.name == "FLOOD_WAIT" {
            self.value
        } else {
            None
        }
    }

    /// The target DC if this is a `*_MIGRATE_N` redirect.
    pub fn migrate_target(&self) -> Option<i32> {
        if self.code == 303
            && matches!(self.name.as_str(), "USER_MIGRATE" | "PHONE_MIGRATE" | "NETWORK_MIGRATE")
        {
            self.value.map(|v| v as i32)
        } else {
            None
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────────────────

/// The error type surfaced by client operations.
#[derive(Debug)]
pub enum Error {
    /// The server rejected the request and no local recovery applied.
    Rpc(RpcError),
    /// Network failure.
    Io(io::Error),
    /// Response bytes did not decode as the expected type.
    Decode(String),
    /// The core is offline; reported locally with code 600.
    NotConnected,
    /// The query was abandoned before completion.
    Dropped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Decode(s) => write!(f, "decode error: {s}"),
            Self::NotConnected => write!(f, "RPC 600: NOT_CONNECTED"),
            Self::Dropped => write!(f, "query dropped"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<courier_tl::deserialize::Error> for Error {
    fn from(e: courier_tl::deserialize::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_suffixes() {
        let e = RpcError::from_server(420, "FLOOD_WAIT_12");
        assert_eq!(e.name, "FLOOD_WAIT");
        assert_eq!(e.value, Some(12));
        assert_eq!(e.flood_wait_seconds(), Some(12));
    }

    #[test]
    fn keeps_plain_names_whole() {
        let e = RpcError::from_server(400, "SESSION_PASSWORD_NEEDED");
        assert_eq!(e.name, "SESSION_PASSWORD_NEEDED");
        assert_eq!(e.value, None);
    }

    #[test]
    fn migration_targets() {
        for name in ["USER_MIGRATE_5", "PHONE_MIGRATE_5", "NETWORK_MIGRATE_5"] {
            let e = RpcError::from_server(303, name);
            assert_eq!(e.migrate_target(), Some(5), "{name}");
        }
        assert_eq!(RpcError::from_server(303, "WHATEVER_5").migrate_target(), None);
        assert_eq!(RpcError::from_server(420, "FLOOD_WAIT_5").migrate_target(), None);
    }

    #[test]
    fn wildcard_matching() {
        let e = RpcError::from_server(400, "PHONE_CODE_INVALID");
        assert!(e.is("PHONE_CODE_*"));
        assert!(e.is("*_INVALID"));
        assert!(!e.is("PHONE_CODE"));
    }
}
