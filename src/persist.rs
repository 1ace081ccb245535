//! Versioned persistence of per-key alert state and fill-model parameters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::alert::{KeyState, WatchKey};
use crate::error::WatchError;
use crate::events::AlertDecision;
use crate::fill::FillModelParameters;
use crate::types::Instrument;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub watch: Vec<(WatchKey, KeyState)>,
    pub fill_params: FillModelParameters,
    /// Operator mutes with their unmute time.
    #[serde(default)]
    pub mutes: Vec<(Instrument, DateTime<Utc>)>,
    #[serde(default)]
    pub recent_alerts: Vec<AlertDecision>,
}

impl PersistedState {
    pub fn new(watch: Vec<(WatchKey, KeyState)>, fill_params: FillModelParameters) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            watch,
            fill_params,
            mutes: Vec::new(),
            recent_alerts: Vec::new(),
        }
    }

    pub fn with_mutes(mut self, mutes: Vec<(Instrument, DateTime<Utc>)>) -> Self {
        self.mutes = mutes;
        self
    }

    pub fn with_recent_alerts(mut self, alerts: Vec<AlertDecision>) -> Self {
        self.recent_alerts = alerts;
        self
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(Vec::new(), FillModelParameters::default())
    }
}

pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet. A `Schema` error means the
    /// stored state was unusable and callers should start from defaults.
    fn load_state(&self) -> Result<Option<PersistedState>, WatchError>;
    fn save_state(&self, state: &PersistedState) -> Result<(), WatchError>;
}

/// Keeps state in process memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
    saves: Mutex<u64>,
}

impl MemoryStateStore {
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    pub fn saves(&self) -> u64 {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStateStore {
    fn load_state(&self) -> Result<Option<PersistedState>, WatchError> {
        let state = self.state.lock().clone();
        match state {
            Some(s) if s.schema_version != SCHEMA_VERSION => Err(WatchError::Schema(format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                s.schema_version
            ))),
            other => Ok(other),
        }
    }

    fn save_state(&self, state: &PersistedState) -> Result<(), WatchError> {
        *self.state.lock() = Some(state.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// JSON file store. Saves through clones of one store are serialized, and
/// every save writes its own temp file before the rename.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    seq: Arc<AtomicU64>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn persist_err(&self, path: &Path, source: std::io::Error) -> WatchError {
        WatchError::Persist {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Move an unusable file aside so the next save starts clean.
    fn quarantine(&self, why: String) -> WatchError {
        let backup = self.sibling(&format!(".corrupt-{}", Utc::now().timestamp()));
        match fs::rename(&self.path, &backup) {
            Ok(()) => WatchError::Schema(format!("{why}; moved to {}", backup.display())),
            Err(err) => WatchError::Schema(format!("{why}; backup failed: {err}")),
        }
    }
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<Option<PersistedState>, WatchError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.persist_err(&self.path, err)),
        };
        let value: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(err) => return Err(self.quarantine(format!("unparseable state: {err}"))),
        };
        let version = value.get("schema_version").and_then(|v| v.as_u64());
        if version != Some(u64::from(SCHEMA_VERSION)) {
            return Err(self.quarantine(format!(
                "schema version {version:?} (expected {SCHEMA_VERSION})"
            )));
        }
        match serde_json::from_value::<PersistedState>(value) {
            Ok(state) => Ok(Some(state)),
            Err(err) => Err(self.quarantine(format!("malformed state: {err}"))),
        }
    }

    fn save_state(&self, state: &PersistedState) -> Result<(), WatchError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.persist_err(parent, e))?;
        }
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| WatchError::Schema(format!("unable to encode state: {e}")))?;
        let _guard = self.write_lock.lock();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.sibling(&format!(".tmp-{}-{seq}", std::process::id()));
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&body)?;
                file.sync_all()
            })
            .map_err(|e| self.persist_err(&tmp, e));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.persist_err(&self.path, e))
    }
}
