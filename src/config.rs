//! Process configuration read from the environment

use crate::llm::DEFAULT_BASE_URL;
use crate::turn::{DEFAULT_MODEL, DEFAULT_NAMESPACE};
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Cache database path that selects the in-process cache
pub const IN_MEMORY_CACHE: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub cache_ttl: Duration,
    pub cache_db_path: String,
    pub cache_namespace: String,
    pub openai_base_url: String,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let cache_db_path = var("CACHE_DB_PATH").unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.turn-broker/cache.db")
        });

        Self {
            port: parse_or(&var, "TURN_BROKER_PORT", DEFAULT_PORT),
            cache_ttl: Duration::from_secs(parse_or(&var, "CACHE_TTL", DEFAULT_CACHE_TTL_SECS)),
            cache_db_path,
            cache_namespace: var("CACHE_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn uses_in_memory_cache(&self) -> bool {
        self.cache_db_path == IN_MEMORY_CACHE
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    match var(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, default = %default, "Invalid numeric setting, using default");
            default
        }),
    }
}
