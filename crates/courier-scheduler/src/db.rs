use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `scheduled_jobs` table (idempotent) plus partial indexes for
/// the two polling queries. Instants are stored by [`format_ts`], whose fixed
/// width makes SQL string comparison agree with time comparison; the CHECK
/// constraint relies on that.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id                  TEXT    NOT NULL PRIMARY KEY,
            owner               INTEGER NOT NULL,
            target              INTEGER NOT NULL,
            content             TEXT    NOT NULL,
            kind                TEXT    NOT NULL CHECK (kind IN ('text', 'photo', 'video')),
            schedule_time       TEXT    NOT NULL,   -- UTC, see format_ts
            delete_time         TEXT,               -- UTC or NULL
            delivery_reference  TEXT,               -- set once the send succeeded
            claimed_at          TEXT,               -- set while a send is in flight
            recurrence          TEXT,               -- reserved, always NULL
            created_at          TEXT    NOT NULL,
            CHECK (delete_time IS NULL OR delete_time > schedule_time)
        ) STRICT;

        -- dueForSend: WHERE delivery_reference IS NULL AND schedule_time <= ?
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_send
            ON scheduled_jobs (schedule_time) WHERE delivery_reference IS NULL;

        -- dueForDelete: WHERE delivery_reference IS NOT NULL AND delete_time <= ?
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_delete
            ON scheduled_jobs (delete_time) WHERE delivery_reference IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_owner ON scheduled_jobs (owner);
        ",
    )?;
    Ok(())
}

/// Canonical storage form: UTC, millisecond precision, `Z` suffix.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
