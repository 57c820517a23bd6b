//! Persisted key-value state for the parental-control subsystem
//!
//! The layout is a flat map per namespace, one namespace per logical entity.
//! Only this crate writes these keys; everything else reads the derived
//! `ParentalControlState` snapshot.

mod file;

pub use file::{FileStore, get_state_path};

use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// Namespaces and key names of the persisted layout
pub mod keys {
    pub const CREDENTIAL: &str = "credential";
    pub const PIN_HASH: &str = "pin_hash";
    pub const PIN_SALT: &str = "pin_salt";
    pub const IS_ENABLED: &str = "is_enabled";

    pub const LOCKOUT: &str = "lockout";
    pub const FAILED_ATTEMPTS: &str = "failed_attempts";
    pub const LOCKOUT_ELAPSED_MONOTONIC: &str = "lockout_elapsed_monotonic";
    pub const LOCKOUT_WALL: &str = "lockout_wall";

    pub const TIME_INTEGRITY: &str = "time_integrity";
    pub const LAST_KNOWN_WALL_TIME: &str = "last_known_wall_time";
    pub const LAST_KNOWN_MONOTONIC: &str = "last_known_monotonic";
    pub const TIME_TAMPERING_DETECTED: &str = "time_tampering_detected";
    pub const BOOT_ID: &str = "boot_id";

    pub const SETTINGS: &str = "settings";
    pub const MAX_DAILY_MINUTES: &str = "max_daily_minutes";
    pub const BEDTIME_ENABLED: &str = "bedtime_enabled";
    pub const BEDTIME_START_HOUR: &str = "bedtime_start_hour";
    pub const BEDTIME_START_MINUTE: &str = "bedtime_start_minute";
    pub const BEDTIME_END_HOUR: &str = "bedtime_end_hour";
    pub const BEDTIME_END_MINUTE: &str = "bedtime_end_minute";
    pub const BLOCK_DMS: &str = "block_dms";
    pub const BLOCK_EXPLORE: &str = "block_explore";
    pub const BLOCK_POSTING: &str = "block_posting";
    pub const REQUIRE_APPROVAL_FOR_FOLLOWS: &str = "require_approval_for_follows";
    pub const CONTENT_FILTER_LEVEL: &str = "content_filter_level";

    pub const USAGE: &str = "usage";
    pub const DAILY_USAGE_MINUTES: &str = "daily_usage_minutes";
    pub const USAGE_DATE: &str = "usage_date";

    /// Every namespace owned by the subsystem
    pub const ALL_NAMESPACES: [&str; 5] = [CREDENTIAL, LOCKOUT, TIME_INTEGRITY, SETTINGS, USAGE];
}

/// Namespaced map of values
pub type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

/// Key-value persistence
///
/// Mutations are buffered in memory and made durable by `flush`. Callers
/// bracket each read-modify-write with `begin` and `end`; a store whose
/// backing storage is shared with other processes takes its cross-process
/// lock and re-reads the latest data in `begin`.
pub trait KeyValueStore: Send {
    fn get(&self, namespace: &str, key: &str) -> Option<Value>;

    fn put(&mut self, namespace: &str, key: &str, value: Value);

    fn remove(&mut self, namespace: &str, key: &str);

    fn clear_namespace(&mut self, namespace: &str);

    /// Persist buffered mutations
    fn flush(&mut self) -> Result<()>;

    /// Take exclusive ownership of the backing storage and reload it
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release what `begin` acquired
    fn end(&mut self) {}

    fn get_u64(&self, namespace: &str, key: &str) -> Option<u64> {
        self.get(namespace, key).and_then(|v| v.as_u64())
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Option<bool> {
        self.get(namespace, key).and_then(|v| v.as_bool())
    }

    fn get_str(&self, namespace: &str, key: &str) -> Option<String> {
        self.get(namespace, key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_u64(&mut self, namespace: &str, key: &str, value: u64) {
        self.put(namespace, key, Value::from(value));
    }

    fn put_bool(&mut self, namespace: &str, key: &str, value: bool) {
        self.put(namespace, key, Value::Bool(value));
    }

    fn put_str(&mut self, namespace: &str, key: &str, value: &str) {
        self.put(namespace, key, Value::String(value.to_string()));
    }
}

/// In-memory store, nothing survives the process
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Namespaces,
    flushes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `flush` calls, for asserting write-through behaviour
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// True if no namespace holds any key
    pub fn is_empty(&self) -> bool {
        self.data.values().all(BTreeMap::is_empty)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.data.get(namespace)?.get(key).cloned()
    }

    fn put(&mut self, namespace: &str, key: &str, value: Value) {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove(&mut self, namespace: &str, key: &str) {
        if let Some(map) = self.data.get_mut(namespace) {
            map.remove(key);
        }
    }

    fn clear_namespace(&mut self, namespace: &str) {
        self.data.remove(namespace);
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        (**self).get(namespace, key)
    }

    fn put(&mut self, namespace: &str, key: &str, value: Value) {
        (**self).put(namespace, key, value)
    }

    fn remove(&mut self, namespace: &str, key: &str) {
        (**self).remove(namespace, key)
    }

    fn clear_namespace(&mut self, namespace: &str) {
        (**self).clear_namespace(namespace)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn end(&mut self) {
        (**self).end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_round_trip() {
        let mut store = MemoryStore::new();
        store.put_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS, 3);
        store.put_bool(keys::CREDENTIAL, keys::IS_ENABLED, true);
        store.put_str(keys::USAGE, keys::USAGE_DATE, "2025-11-16");

        assert_eq!(store.get_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS), Some(3));
        assert_eq!(store.get_bool(keys::CREDENTIAL, keys::IS_ENABLED), Some(true));
        assert_eq!(store.get_str(keys::USAGE, keys::USAGE_DATE).as_deref(), Some("2025-11-16"));
    }

    #[test]
    fn test_wrong_type_reads_as_missing() {
        let mut store = MemoryStore::new();
        store.put_str(keys::LOCKOUT, keys::FAILED_ATTEMPTS, "three");
        assert_eq!(store.get_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS), None);
    }

    #[test]
    fn test_clear_namespace_leaves_others() {
        let mut store = MemoryStore::new();
        store.put_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS, 2);
        store.put_u64(keys::USAGE, keys::DAILY_USAGE_MINUTES, 40);

        store.clear_namespace(keys::LOCKOUT);

        assert_eq!(store.get_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS), None);
        assert_eq!(store.get_u64(keys::USAGE, keys::DAILY_USAGE_MINUTES), Some(40));
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        let mut store = MemoryStore::new();
        store.remove(keys::SETTINGS, keys::BLOCK_DMS);
        assert!(store.is_empty());
    }
}
