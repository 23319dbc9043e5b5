use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const PREFS_FILE: &str = "prefs.json";
pub const DEVICE_ID_KEY: &str = "device_id";

/// Small string key/value file kept beside, not inside, the record store.
pub struct Prefs {
    path: PathBuf,
}

impl Prefs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join(PREFS_FILE))
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid prefs file {}", self.path.to_string_lossy())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read {}", self.path.to_string_lossy())),
        }
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut map = self.load()?;
        map.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&map)?)
            .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.to_string_lossy()))?;
        Ok(())
    }
}

/// Stable per-device identifier sent with every sync batch. Created on first
/// use and never rotated.
pub struct DeviceIdentity {
    prefs: Prefs,
    cached: Mutex<Option<String>>,
}

impl DeviceIdentity {
    pub fn new(prefs: Prefs) -> Self {
        Self {
            prefs,
            cached: Mutex::new(None),
        }
    }

    pub fn resolve(&self) -> anyhow::Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = match self.prefs.get(DEVICE_ID_KEY)? {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = format!("device-{}", Uuid::new_v4());
                self.prefs.set(DEVICE_ID_KEY, &id)?;
                tracing::info!(device_id = %id, "generated device id");
                id
            }
        };
        *cached = Some(id.clone());
        Ok(id)
    }
}
