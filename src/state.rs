//! Persistence of counters and account data across restarts
//!
//! The whole state is one JSON document, rewritten wholesale through a
//! temporary file and a rename so a crash never leaves a truncated file.
//! The file holds the account data, so it is only readable by its owner.

use crate::api::{Dashboard, Device, Local, Resident};
use crate::counters::CounterState;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reference data fetched at bootstrap
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountSnapshot {
    pub resident: Resident,
    pub local: Local,
    pub dashboards: Vec<Dashboard>,
    pub devices: Vec<Device>,
}

impl AccountSnapshot {
    /// Id of the single unit this account occupies
    pub fn local_id(&self) -> &str {
        &self.local.local.id
    }
}

/// Persistent state structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub counter_states: Vec<CounterState>,
    pub account_data: Option<AccountSnapshot>,
}

impl PersistedState {
    /// Account data still has to be fetched
    pub fn needs_bootstrap(&self) -> bool {
        self.account_data
            .as_ref()
            .is_none_or(|a| a.local_id().is_empty() || self.counter_states.is_empty())
    }
}

/// Reads and writes [`PersistedState`] at a fixed path
#[derive(Debug)]
pub struct StateStore {
    file_path: PathBuf,
    logger: StructuredLogger,
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(file_path: P) -> Self {
        Self {
            file_path: file_path.into(),
            logger: get_logger("state"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load state from disk; a missing file is an empty state
    pub fn load(&self) -> Result<PersistedState> {
        if !self.file_path.exists() {
            self.logger.info(&format!(
                "No state file at {}, starting empty",
                self.file_path.display()
            ));
            return Ok(PersistedState::default());
        }

        let contents = std::fs::read_to_string(&self.file_path)?;
        let state: PersistedState = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded state from {} ({} counter(s))",
            self.file_path.display(),
            state.counter_states.len()
        ));
        Ok(state)
    }

    /// Save state to disk
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(dir) = self.file_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let tmp = self.file_path.with_extension("json.tmp");
        // Leftover from an interrupted save, possibly with wider permissions
        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &self.file_path)?;

        self.logger
            .debug(&format!("Saved state to {}", self.file_path.display()));
        Ok(())
    }
}
