//! Backpack request signing
//!
//! Authenticated requests carry `X-API-Key`, `X-Timestamp`, `X-Window` and
//! `X-Signature` headers. The signature is ed25519 over
//! `instruction=<name>&<sorted params>&timestamp=<ms>&window=<ms>`,
//! base64 encoded.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey, SECRET_KEY_LENGTH};
use serde_json::Value;
use tracing::warn;

/// Default receive window in milliseconds
pub const DEFAULT_WINDOW_MS: u64 = 5000;
pub const MAX_WINDOW_MS: u64 = 60_000;

/// Header values for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: String,
    pub window: String,
    pub signature: String,
}

/// API key plus the ed25519 key that signs for it
pub struct Credentials {
    api_key: String,
    signing_key: SigningKey,
    window_ms: u64,
}

impl Credentials {
    /// Create credentials from environment variables
    ///
    /// Expects:
    /// - `BACKPACK_API_KEY` - Base64 public key
    /// - `BACKPACK_PRIVATE_KEY` - Base64 32-byte ed25519 seed
    /// - `BACKPACK_WINDOW_MS` (optional) - Receive window, defaults to 5000
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BACKPACK_API_KEY")
            .context("BACKPACK_API_KEY environment variable not set")?;
        let seed = std::env::var("BACKPACK_PRIVATE_KEY")
            .context("BACKPACK_PRIVATE_KEY environment variable not set")?;
        let credentials = Self::new(api_key, &seed)?;
        match std::env::var("BACKPACK_WINDOW_MS") {
            Ok(window) => credentials.with_window(
                window
                    .parse()
                    .with_context(|| format!("Invalid BACKPACK_WINDOW_MS '{}'", window))?,
            ),
            Err(_) => Ok(credentials),
        }
    }

    pub fn new(api_key: impl Into<String>, private_key_seed: &str) -> Result<Self> {
        let seed = STANDARD
            .decode(private_key_seed.trim())
            .context("Failed to decode BACKPACK_PRIVATE_KEY as base64")?;
        let seed: [u8; SECRET_KEY_LENGTH] = seed.as_slice().try_into().map_err(|_| {
            anyhow!(
                "Private key seed must be {} bytes, got {}",
                SECRET_KEY_LENGTH,
                seed.len()
            )
        })?;
        let credentials = Self {
            api_key: api_key.into(),
            signing_key: SigningKey::from_bytes(&seed),
            window_ms: DEFAULT_WINDOW_MS,
        };
        if credentials.verifying_key_base64() != credentials.api_key {
            warn!("BACKPACK_API_KEY is not the public key of BACKPACK_PRIVATE_KEY; requests will be rejected");
        }
        Ok(credentials)
    }

    pub fn with_window(mut self, window_ms: u64) -> Result<Self> {
        if window_ms > MAX_WINDOW_MS {
            bail!("Window must be at most {} ms, got {}", MAX_WINDOW_MS, window_ms);
        }
        self.window_ms = window_ms;
        Ok(self)
    }

    /// Base64 public key matching the signing key
    pub fn verifying_key_base64(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(
        &self,
        instruction: &str,
        params: &BTreeMap<String, String>,
        timestamp_ms: i64,
    ) -> SignedHeaders {
        let message = signing_string(instruction, params, timestamp_ms, self.window_ms);
        let signature = self.signing_key.sign(message.as_bytes());
        SignedHeaders {
            api_key: self.api_key.clone(),
            timestamp: timestamp_ms.to_string(),
            window: self.window_ms.to_string(),
            signature: STANDARD.encode(signature.to_bytes()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("window_ms", &self.window_ms)
            .finish_non_exhaustive()
    }
}

pub fn signing_string(
    instruction: &str,
    params: &BTreeMap<String, String>,
    timestamp_ms: i64,
    window_ms: u64,
) -> String {
    let mut message = format!("instruction={}", instruction);
    for (key, value) in params {
        message.push('&');
        message.push_str(key);
        message.push('=');
        message.push_str(value);
    }
    message.push_str(&format!("&timestamp={}&window={}", timestamp_ms, window_ms));
    message
}

/// Flatten a JSON request body into signable params. Strings are taken
/// verbatim, other scalars in their JSON form, nulls dropped.
pub fn body_params(body: &Value) -> BTreeMap<String, String> {
    let Some(object) = body.as_object() else {
        return BTreeMap::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), value))
        })
        .collect()
}
