//! Small JSON key/value store, one object per module, saved a moment after each change.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::app::Logger;
use crate::Result;

pub const SAVE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct PersistentStore {
    path: Option<PathBuf>,
    data: Map<String, Value>,
    dirty_since: Option<Instant>,
    logger: Logger,
}

impl PersistentStore {
    /// Load `path`. Missing, empty or malformed files start an empty store.
    pub fn open(path: &Path, logger: Logger) -> Self {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = std::fs::create_dir_all(parent) {
                logger.warn(format!(
                    "cannot create storage directory {}: {err}",
                    parent.display()
                ));
            }
        }
        let data = load_object(path, &logger);
        Self {
            path: Some(path.to_path_buf()),
            data,
            dirty_since: None,
            logger,
        }
    }

    /// Store that never touches disk.
    pub fn in_memory(logger: Logger) -> Self {
        Self {
            path: None,
            data: Map::new(),
            dirty_since: None,
            logger,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn set(&mut self, module: &str, key: &str, value: impl Into<Value>) {
        let entry = self
            .data
            .entry(module.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(obj) = entry {
            obj.insert(key.to_string(), value.into());
        }
        self.dirty_since.get_or_insert_with(Instant::now);
    }

    pub fn get(&self, module: &str, key: &str) -> Option<&Value> {
        self.data.get(module)?.as_object()?.get(key)
    }

    pub fn get_str(&self, module: &str, key: &str) -> Option<&str> {
        self.get(module, key)?.as_str()
    }

    pub fn get_i64(&self, module: &str, key: &str) -> Option<i64> {
        self.get(module, key)?.as_i64()
    }

    /// Save when the oldest unsaved change is at least [`SAVE_DELAY`] old.
    pub fn flush_due(&mut self, now: Instant) -> Result<bool> {
        match self.dirty_since {
            Some(since) if now.saturating_duration_since(since) >= SAVE_DELAY => {
                self.save()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Write `<path>.tmp` and rename it over the target.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            self.dirty_since = None;
            return Ok(());
        };
        if self.dirty_since.is_none() {
            return Ok(());
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let text = serde_json::to_string_pretty(&Value::Object(self.data.clone()))?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        self.logger
            .debug(format!("saved persistent data to {}", path.display()));
        self.dirty_since = None;
        Ok(())
    }
}

fn load_object(path: &Path, logger: &Logger) -> Map<String, Value> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => {
            logger.debug("starting with empty persistent storage (file not found)");
            return Map::new();
        }
    };
    if text.trim().is_empty() {
        logger.info("storage file is empty, starting with an empty object");
        return Map::new();
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => {
            logger.debug(format!("loaded persistent storage from {}", path.display()));
            map
        }
        Ok(_) => {
            logger.error("storage file does not contain a JSON object");
            Map::new()
        }
        Err(err) => {
            logger.error(format!("JSON parse error in storage file: {err}"));
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_a_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/config_data.json");
        let mut store = PersistentStore::open(&path, Logger::silent());
        store.set("brightness", "level", 200);
        store.set("ping", "last_ip", "192.168.001.001");
        store.save().unwrap();
        assert!(!store.is_dirty());
        assert!(!dir.path().join("state/config_data.json.tmp").exists());

        let reloaded = PersistentStore::open(&path, Logger::silent());
        assert_eq!(reloaded.get_i64("brightness", "level"), Some(200));
        assert_eq!(reloaded.get_str("ping", "last_ip"), Some("192.168.001.001"));
        assert_eq!(reloaded.get_str("ping", "missing"), None);
    }

    #[test]
    fn save_waits_for_the_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut store = PersistentStore::open(&path, Logger::silent());
        store.set("m", "k", "v");
        let now = Instant::now();
        assert!(!store.flush_due(now).unwrap());
        assert!(!path.exists());
        assert!(store.flush_due(now + SAVE_DELAY).unwrap());
        assert!(path.exists());
        assert!(!store.flush_due(now + SAVE_DELAY * 2).unwrap());
    }

    #[test]
    fn bad_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [("empty.json", ""), ("list.json", "[1,2]"), ("junk.json", "{nope")] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            let store = PersistentStore::open(&path, Logger::silent());
            assert!(store.get("m", "k").is_none());
        }
    }

    #[test]
    fn non_object_module_entry_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"ping": "oops"}"#).unwrap();
        let mut store = PersistentStore::open(&path, Logger::silent());
        store.set("ping", "last_ip", "10.0.0.1");
        assert_eq!(store.get_str("ping", "last_ip"), Some("10.0.0.1"));
    }
}
