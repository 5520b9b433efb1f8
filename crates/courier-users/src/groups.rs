use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, instrument};

use courier_core::{OwnerId, TargetId};

use crate::db::{init_db, row_to_group, GROUP_SELECT_SQL};
use crate::error::{Result, UserError};
use crate::types::Group;

/// The set of destinations an operator may pick while composing.
pub trait TargetDirectory: Send + Sync {
    fn known_targets(&self) -> Result<Vec<Group>>;
    fn lookup(&self, target: TargetId) -> Result<Option<Group>>;
}

/// SQLite-backed registry of groups the bot was registered in.
#[derive(Clone)]
pub struct GroupStore {
    conn: Arc<Mutex<Connection>>,
}

impl GroupStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| UserError::LockPoisoned)
    }

    #[instrument(skip(self, name), fields(target = %target))]
    pub fn register(&self, target: TargetId, name: &str, by: Option<OwnerId>) -> Result<Group> {
        if self.lookup(target)?.is_some() {
            return Err(UserError::AlreadyExists(target.to_string()));
        }
        let now = Utc::now().to_rfc3339();
        self.db()?.execute(
            "INSERT INTO groups (group_id, group_name, registered_by, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![target.get(), name, by.map(OwnerId::get), now],
        )?;
        info!(%name, "group registered");
        Ok(Group {
            id: target,
            name: name.to_string(),
            registered_by: by,
            created_at: now,
        })
    }

    /// Drop a group from the registry, returning what was removed.
    ///
    /// Jobs already scheduled for the group are left alone.
    #[instrument(skip(self), fields(target = %target))]
    pub fn remove(&self, target: TargetId) -> Result<Group> {
        let group = self
            .lookup(target)?
            .ok_or_else(|| UserError::GroupNotFound(target.to_string()))?;
        self.db()?
            .execute("DELETE FROM groups WHERE group_id = ?1", params![target.get()])?;
        info!(name = %group.name, "group removed");
        Ok(group)
    }
}

impl TargetDirectory for GroupStore {
    fn known_targets(&self) -> Result<Vec<Group>> {
        let db = self.db()?;
        let mut stmt = db.prepare(&format!("{GROUP_SELECT_SQL} ORDER BY group_name"))?;
        let rows = stmt.query_map([], row_to_group)?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    fn lookup(&self, target: TargetId) -> Result<Option<Group>> {
        let db = self.db()?;
        match db.query_row(
            &format!("{GROUP_SELECT_SQL} WHERE group_id = ?1"),
            params![target.get()],
            row_to_group,
        ) {
            Ok(g) => Ok(Some(g)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::DatabaseError(e)),
        }
    }
}
