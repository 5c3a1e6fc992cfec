//! HTTP basic auth against an htpasswd file.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Challenge sent with every 401.
pub const CHALLENGE: &str = "Basic realm=\"metrics-relay\"";

#[derive(Clone, Debug)]
enum Credential {
    Plain(String),
    Sha256([u8; 32]),
}

/// Verifier for one endpoint. Loaded once at startup; requests only read.
///
/// Supported entry forms are `{SHA256}` followed by the base64 digest, and
/// `{PLAIN}`/bare plaintext. Apache's MD5 and bcrypt forms are rejected at
/// load so a silently unusable file cannot reach serving.
#[derive(Clone, Debug)]
pub struct BasicAuth {
    users: HashMap<String, Credential>,
}

impl BasicAuth {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Htpasswd {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::parse(&raw).map_err(|message| ConfigError::Htpasswd {
            path: path.display().to_string(),
            message,
        })
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let mut users = HashMap::new();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, secret) = line
                .split_once(':')
                .ok_or_else(|| format!("line {}: expected user:credential", number + 1))?;

            let credential = if let Some(digest) = secret.strip_prefix("{SHA256}") {
                let bytes = BASE64
                    .decode(digest)
                    .map_err(|err| format!("line {}: invalid base64 digest: {err}", number + 1))?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| format!("line {}: SHA256 digest must be 32 bytes", number + 1))?;
                Credential::Sha256(bytes)
            } else if let Some(plain) = secret.strip_prefix("{PLAIN}") {
                Credential::Plain(plain.to_string())
            } else if secret.starts_with('$') || secret.starts_with('{') {
                return Err(format!(
                    "line {}: unsupported credential scheme (use {{SHA256}} or {{PLAIN}})",
                    number + 1
                ));
            } else {
                Credential::Plain(secret.to_string())
            };

            users.insert(user.to_string(), credential);
        }

        if users.is_empty() {
            return Err("no credentials found".to_string());
        }
        Ok(Self { users })
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> bool {
        let Some(header) = header else {
            return false;
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, password)) = decoded.split_once(':') else {
            return false;
        };

        match self.users.get(user) {
            Some(Credential::Plain(expected)) => expected == password,
            Some(Credential::Sha256(expected)) => {
                let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
                &digest == expected
            }
            None => false,
        }
    }
}
