//! Secret resolution for upstream credentials

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),
    #[error("Secret is empty: {0}")]
    Empty(String),
}

/// Source of named secrets
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads `<NAME>_SECRET` from the environment.
///
/// `openai` additionally falls back to `OPENAI_API_KEY`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider {
    vars: Option<HashMap<String, String>>,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve from a fixed set of variables instead of the process environment
    #[cfg(test)]
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn candidates(name: &str) -> Vec<String> {
        let mut vars = vec![format!("{}_SECRET", name.to_uppercase())];
        if name == "openai" {
            vars.push("OPENAI_API_KEY".to_string());
        }
        vars
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let value = Self::candidates(name)
            .iter()
            .find_map(|var| self.var(var))
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;

        if value.trim().is_empty() {
            return Err(SecretError::Empty(name.to_string()));
        }
        Ok(value)
    }
}
