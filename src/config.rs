//! Key material and prompt options.

use crate::builder::PromptBuilder;
use crate::error::{FenceError, FenceResult};
use crate::signer::{KeyRing, SigningKey};
use crate::verifier::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Hex-encoded signing secret.
pub const ENV_KEY: &str = "PROMPT_FENCE_KEY";
/// Identifier for [`ENV_KEY`]; defaults to [`DEFAULT_KEY_ID`].
pub const ENV_KEY_ID: &str = "PROMPT_FENCE_KEY_ID";
/// Comma-separated `id:hex` pairs accepted for verification only.
pub const ENV_RETIRED_KEYS: &str = "PROMPT_FENCE_RETIRED_KEYS";

pub const DEFAULT_KEY_ID: &str = "default";

/// One configured key.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyConfig {
    pub id: String,
    pub secret_hex: String,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("id", &self.id)
            .field("secret_hex", &"<redacted>")
            .finish()
    }
}

/// Fence configuration, usually read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FenceConfig {
    /// Id of the signing key; defaults to the first entry of `keys`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_key: Option<String>,

    /// Prepend the awareness preamble to built prompts.
    #[serde(default = "default_true")]
    pub awareness_instructions: bool,

    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            active_key: None,
            awareness_instructions: true,
            keys: Vec::new(),
        }
    }
}

impl FenceConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> FenceResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> FenceResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            keys = config.keys.len(),
            "loaded fence configuration"
        );
        Ok(config)
    }

    /// Read keys from the process environment.
    pub fn from_env() -> FenceResult<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Read keys through `lookup`, which maps a variable name to its value.
    pub fn from_env_with<F>(lookup: F) -> FenceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_hex = lookup(ENV_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| FenceError::config(format!("{} is not set", ENV_KEY)))?;
        let id = lookup(ENV_KEY_ID)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_KEY_ID.to_string());

        let mut keys = vec![KeyConfig {
            id: id.clone(),
            secret_hex: secret_hex.trim().to_string(),
        }];

        if let Some(retired) = lookup(ENV_RETIRED_KEYS) {
            for entry in retired.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (rid, rhex) = entry.split_once(':').ok_or_else(|| {
                    FenceError::config(format!(
                        "{} entries must be 'id:hex'",
                        ENV_RETIRED_KEYS
                    ))
                })?;
                keys.push(KeyConfig {
                    id: rid.trim().to_string(),
                    secret_hex: rhex.trim().to_string(),
                });
            }
        }

        Ok(Self {
            active_key: Some(id),
            awareness_instructions: true,
            keys,
        })
    }

    /// Decode the configured keys into a ring.
    pub fn keyring(&self) -> FenceResult<KeyRing> {
        if self.keys.is_empty() {
            return Err(FenceError::config("no keys configured"));
        }
        let active_id = self
            .active_key
            .clone()
            .unwrap_or_else(|| self.keys[0].id.clone());

        let mut seen = HashSet::new();
        let mut active = None;
        let mut retired = Vec::new();
        for entry in &self.keys {
            if !seen.insert(entry.id.as_str()) {
                return Err(FenceError::config(format!(
                    "key '{}' is configured twice",
                    entry.id
                )));
            }
            let key = SigningKey::from_hex(entry.id.as_str(), &entry.secret_hex)?;
            if key.id() == active_id {
                active = Some(key);
            } else {
                retired.push(key);
            }
        }

        let active = active.ok_or_else(|| {
            FenceError::config(format!("active key '{}' is not configured", active_id))
        })?;
        Ok(retired
            .into_iter()
            .fold(KeyRing::new(active), KeyRing::with_retired))
    }

    /// Verifier over every configured key.
    pub fn verifier(&self) -> FenceResult<Verifier> {
        Verifier::new(self.keyring()?)
    }

    /// Builder honoring `awareness_instructions`.
    pub fn prompt_builder(&self) -> PromptBuilder {
        PromptBuilder::new().with_awareness(self.awareness_instructions)
    }
}
