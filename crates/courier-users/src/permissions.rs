use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, instrument, warn};

use courier_core::OwnerId;

use crate::db::{init_db, row_to_operator, OPERATOR_SELECT_SQL};
use crate::error::{Result, UserError};
use crate::types::{Capability, Operator};

/// The single authorization query the composition session depends on.
///
/// Deterministic against the backing state at call time. Unknown operators
/// hold no capabilities.
pub trait CapabilityCheck: Send + Sync {
    fn has_capability(&self, owner: OwnerId, capability: Capability) -> bool;
}

/// SQLite-backed operator whitelist.
#[derive(Clone)]
pub struct OperatorStore {
    conn: Arc<Mutex<Connection>>,
}

impl OperatorStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| UserError::LockPoisoned)
    }

    pub fn get(&self, owner: OwnerId) -> Result<Option<Operator>> {
        let db = self.db()?;
        match db.query_row(
            &format!("{OPERATOR_SELECT_SQL} WHERE user_id = ?1"),
            params![owner.get()],
            row_to_operator,
        ) {
            Ok(op) => Ok(Some(op)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::DatabaseError(e)),
        }
    }

    /// Whitelist a new operator with no capabilities.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn add(&self, owner: OwnerId) -> Result<Operator> {
        if self.get(owner)?.is_some() {
            return Err(UserError::AlreadyExists(owner.to_string()));
        }
        let now = Utc::now().to_rfc3339();
        self.db()?.execute(
            "INSERT INTO operators (user_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![owner.get(), now],
        )?;
        info!("operator added");
        self.get(owner)?
            .ok_or_else(|| UserError::NotFound(owner.to_string()))
    }

    /// Turn one capability on or off for an existing operator.
    #[instrument(skip(self), fields(owner = %owner, capability = %capability))]
    pub fn set_capability(&self, owner: OwnerId, capability: Capability, enabled: bool) -> Result<()> {
        // Column name comes from a closed enum, never from user input.
        let sql = format!(
            "UPDATE operators SET {} = ?1, updated_at = ?2 WHERE user_id = ?3",
            capability.as_str()
        );
        let n = self
            .db()?
            .execute(&sql, params![enabled as i32, Utc::now().to_rfc3339(), owner.get()])?;
        if n == 0 {
            return Err(UserError::NotFound(owner.to_string()));
        }
        info!(enabled, "capability updated");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Operator>> {
        let db = self.db()?;
        let mut stmt = db.prepare(&format!("{OPERATOR_SELECT_SQL} ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_operator)?;
        let mut operators = Vec::new();
        for row in rows {
            operators.push(row?);
        }
        Ok(operators)
    }

    /// Make sure the configured admin exists and holds every capability.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn ensure_admin(&self, owner: OwnerId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db()?.execute(
            "INSERT INTO operators
                (user_id, can_schedule, can_delete, can_manage_groups,
                 can_monitor, can_manage_whitelist, created_at, updated_at)
             VALUES (?1, 1, 1, 1, 1, 1, ?2, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                can_schedule = 1, can_delete = 1, can_manage_groups = 1,
                can_monitor = 1, can_manage_whitelist = 1, updated_at = ?2",
            params![owner.get(), now],
        )?;
        info!("admin capabilities ensured");
        Ok(())
    }
}

impl CapabilityCheck for OperatorStore {
    fn has_capability(&self, owner: OwnerId, capability: Capability) -> bool {
        match self.get(owner) {
            Ok(Some(op)) => op.has(capability),
            Ok(None) => false,
            Err(e) => {
                // Deny on storage failure.
                warn!(owner = %owner, %capability, error = %e, "capability lookup failed");
                false
            }
        }
    }
}
