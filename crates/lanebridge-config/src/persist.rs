//! Optional persisted-state file (spec §6 "Persisted state", SPEC_FULL §F).
//!
//! Schema `{sessions: [{key, state}], groups: [{chatId, info}]}`, written
//! atomically (write-to-temp + rename) so a crash mid-write can't leave a
//! truncated file behind — the one defensive I/O detail the spec's
//! schema implies but doesn't spell out.

use std::collections::BTreeMap;
use std::path::Path;

use lanebridge_core::session::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read state file {path:?}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to write state file {path:?}: {source}")]
    Write { path: String, #[source] source: std::io::Error },
    #[error("malformed state file {path:?}: {source}")]
    Decode { path: String, #[source] source: serde_json::Error },
    #[error("failed to serialize state: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub key: String,
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedGroup {
    pub chat_id: String,
    pub info: serde_json::Value,
}

/// The file's on-disk shape (spec §6). `BTreeMap` (rather than a
/// `HashMap`) isn't used for the top-level fields themselves — they're a
/// fixed pair of lists, per spec — but anything keyed internally uses
/// `BTreeMap` so nested maps also serialize with a stable key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub sessions: Vec<PersistedSession>,
    #[serde(default)]
    pub groups: Vec<PersistedGroup>,
}

pub trait PersistStore: Send + Sync {
    fn load(&self) -> Result<PersistedState, PersistError>;
    fn save(&self, state: &PersistedState) -> Result<(), PersistError>;
}

/// File-backed [`PersistStore`] (SPEC_FULL §F).
pub struct JsonFilePersistStore {
    path: std::path::PathBuf,
}

impl JsonFilePersistStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PersistStore for JsonFilePersistStore {
    fn load(&self) -> Result<PersistedState, PersistError> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let path_str = self.path.display().to_string();
        let contents = std::fs::read_to_string(&self.path).map_err(|source| PersistError::Read { path: path_str.clone(), source })?;
        serde_json::from_str(&contents).map_err(|source| PersistError::Decode { path: path_str, source })
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        let path_str = self.path.display().to_string();
        // Serialize via a BTreeMap-keyed intermediate value so nested
        // object keys come out in stable order regardless of insertion
        // order (spec §6 "JSON with stable key ordering").
        let stable: StableState = state.into();
        let body = serde_json::to_vec_pretty(&stable).map_err(PersistError::Encode)?;

        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, &body).map_err(|source| PersistError::Write { path: path_str.clone(), source })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| PersistError::Write { path: path_str, source })?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

#[derive(Serialize)]
struct StableState {
    sessions: BTreeMap<String, SessionState>,
    groups: BTreeMap<String, serde_json::Value>,
}

impl From<&PersistedState> for StableState {
    fn from(state: &PersistedState) -> Self {
        Self {
            sessions: state.sessions.iter().map(|s| (s.key.clone(), s.state.clone())).collect(),
            groups: state.groups.iter().map(|g| (g.chat_id.clone(), g.info.clone())).collect(),
        }
    }
}
