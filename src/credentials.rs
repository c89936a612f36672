//! Layered API key lookup.
//!
//! Keys are looked up in the process environment first, then in the
//! `secrets.toml` store, then in values the user typed into the page for
//! their own session. A missing key is never an error: callers treat it as
//! "service unavailable".

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialName {
    LlmApiKey,
    SearchApiKey,
}

impl CredentialName {
    pub fn env_var(self) -> &'static str {
        match self {
            CredentialName::LlmApiKey => "GROQ_API_KEY",
            CredentialName::SearchApiKey => "TAVILY_API_KEY",
        }
    }

    pub fn secret_key(self) -> &'static str {
        match self {
            CredentialName::LlmApiKey => "groq_api_key",
            CredentialName::SearchApiKey => "tavily_api_key",
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub llm_key: Option<String>,
    pub search_key: Option<String>,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        self.llm_key.is_some() && self.search_key.is_some()
    }
}

// Never print the keys themselves.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("llm_key", &self.llm_key.as_ref().map(|_| "<set>"))
            .field("search_key", &self.search_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

pub trait CredentialSource: Send + Sync {
    fn lookup(&self, name: CredentialName) -> Option<String>;
}

/// Process environment (including anything dotenvy loaded from `.env`).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl CredentialSource for EnvSource {
    fn lookup(&self, name: CredentialName) -> Option<String> {
        std::env::var(name.env_var()).ok()
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read secrets file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse secrets file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Flat `key = "value"` TOML file.
#[derive(Default, Clone, Deserialize)]
pub struct SecretStore {
    #[serde(flatten)]
    values: HashMap<String, toml::Value>,
}

impl SecretStore {
    /// Loads the store from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        if !path.exists() {
            info!(path = %path.display(), "No secrets file found, relying on environment");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::parse(&raw).map_err(|source| CredentialsError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), entries = store.values.len(), "Loaded secrets file");
        Ok(store)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl CredentialSource for SecretStore {
    fn lookup(&self, name: CredentialName) -> Option<String> {
        self.values
            .get(name.secret_key())
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }
}

/// Keys entered through the page, scoped to one session.
#[derive(Default, Clone)]
pub struct SessionOverrides {
    values: HashMap<CredentialName, String>,
}

impl std::fmt::Debug for SessionOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl SessionOverrides {
    /// Blank values clear the override.
    pub fn set(&mut self, name: CredentialName, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.values.remove(&name);
        } else {
            self.values.insert(name, value.to_string());
        }
    }
}

impl CredentialSource for SessionOverrides {
    fn lookup(&self, name: CredentialName) -> Option<String> {
        self.values.get(&name).cloned()
    }
}

/// Sources in priority order; the first non-blank hit wins.
pub struct CredentialResolver<'a> {
    sources: Vec<&'a dyn CredentialSource>,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(sources: Vec<&'a dyn CredentialSource>) -> Self {
        Self { sources }
    }

    pub fn resolve(&self, name: CredentialName) -> Option<String> {
        self.sources
            .iter()
            .filter_map(|source| source.lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }

    pub fn resolve_all(&self) -> Credentials {
        Credentials {
            llm_key: self.resolve(CredentialName::LlmApiKey),
            search_key: self.resolve(CredentialName::SearchApiKey),
        }
    }
}
