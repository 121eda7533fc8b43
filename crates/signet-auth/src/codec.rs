//! API key codec
//!
//! Keys look like `psk_<env>_<secret>`:
//! - `env` is `live` or `test`
//! - `secret` is 24 OS-random bytes in base62 (`0-9A-Za-z`), always 33 chars
//!
//! The lookup prefix `psk_<env>_<first 8 secret chars>` is stored in clear
//! and indexed; the full key is only ever stored hashed.

use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};

/// Leading token of every key
pub const KEY_PREFIX: &str = "psk";
/// Random bytes per secret
pub const SECRET_BYTES: usize = 24;
/// Encoded secret width; ceil(24 * 8 / log2(62))
pub const SECRET_LEN: usize = 33;
/// Secret characters included in the lookup prefix
pub const LOOKUP_CHARS: usize = 8;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Key environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Live,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "test" => Ok(Self::Test),
            other => Err(AuthError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a raw key failed to parse
///
/// Callers collapse every variant into [`AuthError::InvalidApiKey`]; the
/// distinction only reaches debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyFormatError {
    #[error("expected three underscore-separated tokens")]
    WrongTokenCount,
    #[error("unknown key prefix")]
    UnknownPrefix,
    #[error("unknown key environment")]
    UnknownEnvironment,
    #[error("malformed key secret")]
    MalformedSecret,
}

impl From<KeyFormatError> for AuthError {
    fn from(_: KeyFormatError) -> Self {
        AuthError::InvalidApiKey
    }
}

/// Newly generated key
pub struct GeneratedKey {
    /// Full key; hand to the caller once, then drop
    pub raw_key: Zeroizing<String>,
    pub lookup_prefix: String,
    pub environment: Environment,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("raw_key", &"[REDACTED]")
            .field("lookup_prefix", &self.lookup_prefix)
            .field("environment", &self.environment)
            .finish()
    }
}

/// Structurally valid key, borrowed from the raw input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub environment: Environment,
    pub secret: &'a str,
}

impl ParsedKey<'_> {
    /// `psk_<env>_<first 8 secret chars>`
    pub fn lookup_prefix(&self) -> String {
        lookup_prefix(self.environment, self.secret)
    }
}

fn lookup_prefix(env: Environment, secret: &str) -> String {
    let head: String = secret.chars().take(LOOKUP_CHARS).collect();
    format!("{}_{}_{}", KEY_PREFIX, env.as_str(), head)
}

/// Generate a new key for `env`
pub fn generate_key(env: Environment) -> AuthResult<GeneratedKey> {
    let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng
        .try_fill_bytes(&mut bytes[..])
        .map_err(|_| AuthError::EntropyUnavailable)?;

    let secret = encode_base62(&bytes[..]);
    let lookup_prefix = lookup_prefix(env, &secret);
    let raw_key = Zeroizing::new(format!("{}_{}_{}", KEY_PREFIX, env.as_str(), secret.as_str()));

    Ok(GeneratedKey {
        raw_key,
        lookup_prefix,
        environment: env,
    })
}

/// Split and check a raw key
///
/// Checks structure only; a key that parses may still be unknown.
pub fn parse_key(raw: &str) -> Result<ParsedKey<'_>, KeyFormatError> {
    let mut parts = raw.splitn(3, '_');
    let (Some(prefix), Some(env), Some(secret)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(KeyFormatError::WrongTokenCount);
    };

    if prefix != KEY_PREFIX {
        return Err(KeyFormatError::UnknownPrefix);
    }

    let environment = match env {
        "live" => Environment::Live,
        "test" => Environment::Test,
        _ => return Err(KeyFormatError::UnknownEnvironment),
    };

    if secret.len() != SECRET_LEN || !secret.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(KeyFormatError::MalformedSecret);
    }

    Ok(ParsedKey {
        environment,
        secret,
    })
}

/// Base62 of a big-endian byte string, left-padded with `0` to [`SECRET_LEN`]
fn encode_base62(bytes: &[u8]) -> Zeroizing<String> {
    let mut num = Zeroizing::new(bytes.to_vec());
    let mut digits = Zeroizing::new(Vec::with_capacity(SECRET_LEN));

    // Repeated long division by 62
    while num.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in num.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 62) as u8;
            remainder = acc % 62;
        }
        digits.push(BASE62[remainder as usize]);
    }
    while digits.len() < SECRET_LEN {
        digits.push(b'0');
    }

    digits.reverse();
    Zeroizing::new(digits.iter().map(|&d| d as char).collect())
}
