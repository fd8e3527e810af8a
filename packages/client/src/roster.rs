//! Device roles within a room and the roster snapshot.

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::dto::websocket::{RoleCounts, RosterUpdateMessage};

/// Role a device plays in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Displays the room's photos; has no camera output of its own
    Recorder,
    /// Captures photos
    Shooter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Recorder => "recorder",
            Role::Shooter => "shooter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recorder" => Ok(Role::Recorder),
            "shooter" => Ok(Role::Shooter),
            other => Err(format!(
                "unknown role '{}', expected 'recorder' or 'shooter'",
                other
            )),
        }
    }
}

/// Role assignment of a room at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub recorder: Option<String>,
    pub shooters: HashSet<String>,
    pub counts: RoleCounts,
}

impl RosterSnapshot {
    pub fn is_shooter(&self, device_id: &str) -> bool {
        self.shooters.contains(device_id)
    }

    pub fn is_recorder(&self, device_id: &str) -> bool {
        self.recorder.as_deref() == Some(device_id)
    }
}

impl From<RosterUpdateMessage> for RosterSnapshot {
    fn from(message: RosterUpdateMessage) -> Self {
        Self {
            recorder: message.recorder,
            shooters: message.shooters.into_iter().collect(),
            counts: message.counts,
        }
    }
}
