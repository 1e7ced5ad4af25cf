//! Versioned envelope persistence with migration on load

use super::{MigrationService, PersistError, StorageAdapter, StorageFault, Version};
use crate::state_machine::ChatCollection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage key used when none is configured
pub const DEFAULT_STORAGE_KEY: &str = "ai-chat-bot";

/// The unit written to the store: a payload plus version metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub data: ChatCollection,
    #[serde(rename = "savedAt", default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    /// Set when the blob was brought forward from an older schema
    #[serde(rename = "migratedAt", default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: &'a str,
    data: &'a ChatCollection,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
    #[serde(rename = "migratedAt", skip_serializing_if = "Option::is_none")]
    migrated_at: Option<DateTime<Utc>>,
}

/// Loads and saves the chat collection under a single key
#[derive(Debug)]
pub struct StorageService {
    adapter: StorageAdapter,
    migrator: MigrationService,
    key: String,
}

impl StorageService {
    pub fn new(adapter: StorageAdapter) -> Self {
        Self {
            adapter,
            migrator: MigrationService::new(),
            key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_migrator(mut self, migrator: MigrationService) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn adapter(&self) -> &StorageAdapter {
        &self.adapter
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current_version(&self) -> &str {
        self.migrator.current_version()
    }

    /// Load the persisted collection.
    ///
    /// Absent, unreadable, or corrupt data all come back as `None`.
    pub async fn load(&self) -> Option<ChatCollection> {
        self.load_envelope().await.map(|envelope| envelope.data)
    }

    /// Load the full envelope, migrating (and writing back) stale blobs
    pub async fn load_envelope(&self) -> Option<Envelope> {
        let raw = self.adapter.read(&self.key).await?;

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding corrupt stored chat data");
                return None;
            }
        };
        if !parsed.is_object() {
            tracing::warn!(key = %self.key, "Discarding stored chat data that is not an object");
            return None;
        }

        if self.migrator.needs_migration(&parsed) {
            let migrated = self.migrator.migrate(parsed);
            let mut envelope = self.decode(migrated)?;
            envelope.saved_at = Some(Utc::now());

            if let Err(e) = self.write(&envelope.data, envelope.migrated_at).await {
                tracing::warn!(key = %self.key, error = %e, "Failed to write back migrated chat data");
            }
            return Some(envelope);
        }

        self.decode(parsed)
    }

    /// Persist `state` in a fresh envelope at the current version
    pub async fn save(&self, state: &ChatCollection) -> Result<(), PersistError> {
        self.write(state, None).await
    }

    async fn write(&self, state: &ChatCollection, migrated_at: Option<DateTime<Utc>>) -> Result<(), PersistError> {
        let envelope = EnvelopeRef {
            version: self.migrator.current_version(),
            data: state,
            saved_at: Utc::now(),
            migrated_at,
        };
        let serialized = serde_json::to_string(&envelope).map_err(StorageFault::from)?;

        self.adapter.write(&self.key, &serialized).await.map_err(|e| {
            tracing::error!(key = %self.key, error = %e, "Failed to persist chat data");
            PersistError::PersistFailed(e)
        })
    }

    /// Turn a parsed blob into an envelope. Blobs without a `data` field are
    /// taken to be the payload itself.
    fn decode(&self, mut value: Value) -> Option<Envelope> {
        let version = Version::of(&value).as_str().to_string();
        let saved_at = timestamp_field(&value, "savedAt");
        let migrated_at = timestamp_field(&value, "migratedAt");
        let payload = if value.get("data").is_some() {
            value["data"].take()
        } else {
            value
        };

        match serde_json::from_value::<ChatCollection>(payload) {
            Ok(data) => Some(Envelope {
                version,
                data,
                saved_at,
                migrated_at,
            }),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Stored chat data has an unexpected shape");
                None
            }
        }
    }
}

fn timestamp_field(value: &Value, field: &str) -> Option<DateTime<Utc>> {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
