use serde::{Deserialize, Serialize};

use courier_core::{OwnerId, TargetId};

/// Named permissions an operator may hold.
///
/// Only `CanSchedule` gates the composition session; the rest guard the
/// operator and group management commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CanSchedule,
    CanDelete,
    CanManageGroups,
    CanMonitor,
    CanManageWhitelist,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::CanSchedule,
        Capability::CanDelete,
        Capability::CanManageGroups,
        Capability::CanMonitor,
        Capability::CanManageWhitelist,
    ];

    /// Column name in the `operators` table; also the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::CanSchedule => "can_schedule",
            Capability::CanDelete => "can_delete",
            Capability::CanManageGroups => "can_manage_groups",
            Capability::CanMonitor => "can_monitor",
            Capability::CanManageWhitelist => "can_manage_whitelist",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability: {s}"))
    }
}

/// Operator record. Stored in SQLite; fetched on every capability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: OwnerId,
    pub can_schedule: bool,
    pub can_delete: bool,
    pub can_manage_groups: bool,
    pub can_monitor: bool,
    pub can_manage_whitelist: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Operator {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::CanSchedule => self.can_schedule,
            Capability::CanDelete => self.can_delete,
            Capability::CanManageGroups => self.can_manage_groups,
            Capability::CanMonitor => self.can_monitor,
            Capability::CanManageWhitelist => self.can_manage_whitelist,
        }
    }
}

/// A registered delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: TargetId,
    pub name: String,
    /// Operator who ran `/register`, when known.
    pub registered_by: Option<OwnerId>,
    pub created_at: String,
}
