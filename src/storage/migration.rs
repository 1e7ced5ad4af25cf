//! Schema versioning and forward migration of persisted blobs
//!
//! Migrations operate on untyped JSON so that blobs written by any older
//! schema, including pre-versioning ones, can be brought forward before they
//! are decoded.

use chrono::Utc;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Schema version written by this build
pub const CURRENT_VERSION: &str = "2.0.0";

/// Version assumed for blobs without a `version` field
pub const LEGACY_VERSION: &str = "1.0.0";

/// Dotted numeric version.
///
/// Components compare as integers, missing components count as 0, and a
/// component that is not a number is treated as 0. No pre-release semantics.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parts: Vec<u64>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let parts = raw
            .trim()
            .split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect();
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Version recorded in a blob, or the legacy version when absent
    pub fn of(data: &Value) -> Self {
        let raw = data
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or(LEGACY_VERSION);
        Self::parse(raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| {
                let a = self.parts.get(i).copied().unwrap_or(0);
                let b = other.parts.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Transform bringing a blob up to one target version. Must be total.
pub type Migration = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// Registry of migrations keyed by the version they produce
pub struct MigrationService {
    current: Version,
    migrations: BTreeMap<Version, Migration>,
}

impl MigrationService {
    /// Service at [`CURRENT_VERSION`] with the built-in migrations registered
    pub fn new() -> Self {
        let mut service = Self::empty(CURRENT_VERSION);
        service.register("2.0.0", migrate_to_v2);
        service
    }

    /// Service with no migrations registered
    pub fn empty(current_version: &str) -> Self {
        Self {
            current: Version::parse(current_version),
            migrations: BTreeMap::new(),
        }
    }

    pub fn current_version(&self) -> &str {
        self.current.as_str()
    }

    /// Register the transform producing `version`; replaces any earlier one
    pub fn register<F>(&mut self, version: &str, migration: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.migrations.insert(Version::parse(version), Box::new(migration));
    }

    /// Whether `data` was written by an older schema than the current one
    pub fn needs_migration(&self, data: &Value) -> bool {
        data.is_object() && Version::of(data) < self.current
    }

    /// Apply, in ascending order, every migration newer than `data`'s version.
    /// The result always carries the current version.
    pub fn migrate(&self, data: Value) -> Value {
        let from = Version::of(&data);
        let mut migrated = data;

        for (version, migration) in self.migrations.range(&from..).filter(|(v, _)| **v > from) {
            tracing::debug!(from = %from, to = %version, "Applying storage migration");
            migrated = migration(migrated);
        }

        if let Value::Object(map) = &mut migrated {
            map.insert("version".to_string(), Value::String(self.current.as_str().to_string()));
        }

        tracing::info!(from = %from, to = %self.current, "Migrated stored chat data");
        migrated
    }
}

impl Default for MigrationService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MigrationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationService")
            .field("current", &self.current.as_str())
            .field(
                "migrations",
                &self.migrations.keys().map(Version::as_str).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// 1.x to 2.0.0: payloads move under `data` inside the envelope.
///
/// A blob that already has a `data` field keeps it; a bare pre-versioning
/// collection becomes the `data` of a new envelope.
fn migrate_to_v2(data: Value) -> Value {
    let mut envelope = match data {
        Value::Object(map) if map.contains_key("data") => map,
        Value::Object(mut map) => {
            let mut envelope = Map::new();
            for meta in ["savedAt", "migratedAt"] {
                if let Some(v) = map.remove(meta) {
                    envelope.insert(meta.to_string(), v);
                }
            }
            map.remove("version");
            envelope.insert("data".to_string(), Value::Object(map));
            envelope
        }
        other => {
            let mut envelope = Map::new();
            envelope.insert("data".to_string(), other);
            envelope
        }
    };

    envelope.insert("version".to_string(), Value::String("2.0.0".to_string()));
    envelope.insert("migratedAt".to_string(), Value::String(Utc::now().to_rfc3339()));
    Value::Object(envelope)
}
