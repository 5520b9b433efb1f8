use rusqlite::{Connection, Result};

use courier_core::{OwnerId, TargetId};

use crate::types::{Group, Operator};

pub(crate) const OPERATOR_SELECT_SQL: &str = "SELECT user_id, can_schedule, can_delete, can_manage_groups,
        can_monitor, can_manage_whitelist, created_at, updated_at
 FROM operators";

pub(crate) const GROUP_SELECT_SQL: &str =
    "SELECT group_id, group_name, registered_by, created_at FROM groups";

/// Map a SELECT row (column order from OPERATOR_SELECT_SQL) to an Operator.
pub(crate) fn row_to_operator(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operator> {
    Ok(Operator {
        id: OwnerId(row.get(0)?),
        can_schedule: row.get::<_, i32>(1)? != 0,
        can_delete: row.get::<_, i32>(2)? != 0,
        can_manage_groups: row.get::<_, i32>(3)? != 0,
        can_monitor: row.get::<_, i32>(4)? != 0,
        can_manage_whitelist: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(crate) fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: TargetId(row.get(0)?),
        name: row.get(1)?,
        registered_by: row.get::<_, Option<i64>>(2)?.map(OwnerId),
        created_at: row.get(3)?,
    })
}

/// Initialise all tables for the users subsystem. Safe to call on every
/// startup; CREATE IF NOT EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_operators_table(conn)?;
    create_groups_table(conn)?;
    Ok(())
}

fn create_operators_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS operators (
            user_id              INTEGER PRIMARY KEY NOT NULL,
            can_schedule         INTEGER NOT NULL DEFAULT 0,
            can_delete           INTEGER NOT NULL DEFAULT 0,
            can_manage_groups    INTEGER NOT NULL DEFAULT 0,
            can_monitor          INTEGER NOT NULL DEFAULT 0,
            can_manage_whitelist INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );",
    )
}

fn create_groups_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS groups (
            group_id      INTEGER PRIMARY KEY NOT NULL,
            group_name    TEXT NOT NULL,
            registered_by INTEGER,
            created_at    TEXT NOT NULL
        );",
    )
}
