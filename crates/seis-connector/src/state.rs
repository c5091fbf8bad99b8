//! Sequence-number checkpoint persisted across restarts

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StateError;

/// Key used for the single stream of all-station mode
pub const ALL_STATIONS: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    pub station: String,
    pub seqnum: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub server: String,
    pub streams: Vec<StreamPosition>,
}

/// Last sequence number seen per station (`NET_STA` or `*`)
#[derive(Debug, Clone, Default)]
pub struct SequenceState {
    positions: BTreeMap<String, u64>,
}

impl SequenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, station: &str, seqnum: u64) {
        self.positions.insert(station.to_string(), seqnum);
    }

    pub fn last(&self, station: &str) -> Option<u64> {
        self.positions.get(station).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn to_file(&self, server: &str) -> StateFile {
        StateFile {
            server: server.to_string(),
            streams: self
                .positions
                .iter()
                .map(|(station, seqnum)| StreamPosition {
                    station: station.clone(),
                    seqnum: *seqnum,
                })
                .collect(),
        }
    }

    pub fn save(&self, path: &Path, server: &str) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&self.to_file(server))?;
        // Replace atomically
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), streams = self.positions.len(), "Saved stream state");
        Ok(())
    }

    pub fn load(path: &Path, server: &str) -> Result<Self, StateError> {
        let text = std::fs::read_to_string(path)?;
        let file: StateFile = serde_json::from_str(&text)?;
        let mut state = Self::new();
        if file.server != server {
            warn!(
                path = %path.display(),
                saved = %file.server,
                current = %server,
                "State file belongs to another server, ignoring"
            );
            return Ok(state);
        }
        for pos in file.streams {
            state.record(&pos.station, pos.seqnum);
        }
        info!(path = %path.display(), streams = state.positions.len(), "Restored stream state");
        Ok(state)
    }

    /// Best-effort restore: a missing or unreadable file starts fresh
    pub fn restore_or_default(path: &Path, server: &str) -> Self {
        match Self::load(path, server) {
            Ok(state) => state,
            Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "State recovery failed, starting fresh");
                Self::new()
            }
        }
    }
}
