//! Runtime configuration from the environment

use crate::llm::LlmConfig;
use crate::persistence::DEFAULT_DEBOUNCE;
use crate::storage::{DEFAULT_MAX_SIZE, DEFAULT_STORAGE_KEY};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings for a chat session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Directory holding the store files
    pub store_dir: PathBuf,
    pub storage_key: String,
    /// Largest serialized blob the store accepts
    pub max_store_bytes: usize,
    pub debounce: Duration,
    pub llm: LlmConfig,
    pub log_format: LogFormat,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".ai-chat-bot"),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_store_bytes: DEFAULT_MAX_SIZE,
            debounce: DEFAULT_DEBOUNCE,
            llm: LlmConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or empty variables keep
    /// their defaults; unparseable ones are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let store_dir = var("CHAT_STORE_DIR").map_or_else(
            || var("HOME").map_or(defaults.store_dir.clone(), |home| PathBuf::from(home).join(".ai-chat-bot")),
            PathBuf::from,
        );

        let mut llm = LlmConfig::default();
        if let Some(url) = var("CHAT_LLM_BASE_URL") {
            llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = var("CHAT_LLM_MODEL") {
            llm.model = model;
        }
        llm.api_key = var("OPENROUTER_API_KEY");

        let log_format = match var("CHAT_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            store_dir,
            storage_key: var("CHAT_STORAGE_KEY").unwrap_or(defaults.storage_key),
            max_store_bytes: parsed(&var, "CHAT_MAX_STORE_BYTES").unwrap_or(defaults.max_store_bytes),
            debounce: parsed(&var, "CHAT_DEBOUNCE_MS").map_or(defaults.debounce, Duration::from_millis),
            llm,
            log_format,
        }
    }
}

fn parsed<T, F>(var: &F, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(variable = name, value = %raw, error = %e, "Ignoring invalid setting");
            None
        }
    }
}
