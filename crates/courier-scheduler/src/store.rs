use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use courier_core::{DeliveryReference, MessageKind, OwnerId, TargetId};

use crate::{
    db::{format_ts, init_db, parse_ts},
    error::{Result, SchedulerError},
    types::{NewJob, ScheduledJob},
};

/// Durable job persistence.
///
/// Every mutating call is its own transaction: it either commits fully or
/// leaves the store exactly as it was.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: NewJob) -> Result<ScheduledJob>;

    /// Persist a finalized composition. All jobs commit together or none do.
    fn insert_all(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>>;

    /// Jobs with `schedule_time <= now` and no delivery reference, oldest first.
    fn due_for_send(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    /// Delivered jobs with `delete_time <= now`, oldest first.
    fn due_for_delete(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    /// Mark an undelivered job as in flight before its send starts.
    ///
    /// Returns `false` when the job is gone or already delivered, in which
    /// case it must not be sent. Claimed jobs refuse [`JobStore::cancel_pending`].
    fn claim(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Undo [`JobStore::claim`] after a failed send.
    fn release(&self, id: &str) -> Result<()>;

    /// Record a successful send for a job that still has a deletion ahead.
    fn mark_delivered(&self, id: &str, reference: &DeliveryReference) -> Result<()>;

    fn remove(&self, id: &str) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<ScheduledJob>>;

    fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<ScheduledJob>>;

    /// Drop one of `owner`'s jobs before it was delivered.
    ///
    /// Fails with [`SchedulerError::JobInFlight`] while the job is claimed.
    fn cancel_pending(&self, owner: OwnerId, id: &str) -> Result<()>;
}

const JOB_COLUMNS: &str = "id, owner, target, content, kind, schedule_time, delete_time,
                           delivery_reference, recurrence, created_at";

/// SQLite-backed [`JobStore`].
///
/// Uses its own `Connection` so the composer and the dispatcher can share one
/// database file without sharing a connection.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    fn query_jobs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ScheduledJob>> {
        let db = self.db()?;
        let mut stmt = db.prepare_cached(sql)?;
        let rows = stmt.query_map(params, row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}

fn insert_row(conn: &Connection, job: &NewJob, created_at: &str) -> Result<ScheduledJob> {
    job.validate()?;
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO scheduled_jobs
         (id, owner, target, content, kind, schedule_time, delete_time,
          delivery_reference, recurrence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8)",
        params![
            id,
            job.owner.get(),
            job.target.get(),
            job.content,
            job.kind.to_string(),
            format_ts(job.schedule_time),
            job.delete_time.map(format_ts),
            created_at,
        ],
    )?;
    Ok(ScheduledJob {
        id,
        owner: job.owner,
        target: job.target,
        content: job.content.clone(),
        kind: job.kind,
        schedule_time: job.schedule_time,
        delete_time: job.delete_time,
        delivery_reference: None,
        recurrence: None,
        created_at: created_at.to_string(),
    })
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(owner = %job.owner, target = %job.target))]
    fn insert(&self, job: NewJob) -> Result<ScheduledJob> {
        let db = self.db()?;
        let stored = insert_row(&db, &job, &Utc::now().to_rfc3339())?;
        info!(job_id = %stored.id, "job added");
        Ok(stored)
    }

    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    fn insert_all(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>> {
        // Validate up front so an invalid tail never opens a transaction.
        for job in &jobs {
            job.validate()?;
        }
        let mut db = self.db()?;
        let tx = db.transaction()?;
        let created_at = Utc::now().to_rfc3339();
        let mut stored = Vec::with_capacity(jobs.len());
        for job in &jobs {
            stored.push(insert_row(&tx, job, &created_at)?);
        }
        tx.commit()?;
        info!(count = stored.len(), "jobs added");
        Ok(stored)
    }

    fn due_for_send(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                 WHERE delivery_reference IS NULL AND schedule_time <= ?1
                 ORDER BY schedule_time, rowid"
            ),
            params![format_ts(now)],
        )
    }

    fn due_for_delete(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                 WHERE delivery_reference IS NOT NULL
                   AND delete_time IS NOT NULL AND delete_time <= ?1
                 ORDER BY delete_time, rowid"
            ),
            params![format_ts(now)],
        )
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn claim(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let n = self.db()?.execute(
            "UPDATE scheduled_jobs SET claimed_at = ?1
             WHERE id = ?2 AND delivery_reference IS NULL",
            params![format_ts(at), id],
        )?;
        Ok(n == 1)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn release(&self, id: &str) -> Result<()> {
        let n = self.db()?.execute(
            "UPDATE scheduled_jobs SET claimed_at = NULL WHERE id = ?1",
            [id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    #[instrument(skip(self, reference), fields(job_id = %id))]
    fn mark_delivered(&self, id: &str, reference: &DeliveryReference) -> Result<()> {
        let mut db = self.db()?;
        let tx = db.transaction()?;
        let current: Option<(Option<String>, Option<String>)> = tx
            .query_row(
                "SELECT delivery_reference, delete_time FROM scheduled_jobs WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match current {
            None => return Err(SchedulerError::JobNotFound { id: id.to_string() }),
            Some((Some(_), _)) => {
                return Err(SchedulerError::InvariantViolation(format!(
                    "job {id} is already delivered"
                )))
            }
            Some((None, None)) => {
                // One-shot jobs are removed after sending, never marked.
                return Err(SchedulerError::InvariantViolation(format!(
                    "job {id} has no delete_time"
                )));
            }
            Some((None, Some(_))) => {}
        }

        tx.execute(
            "UPDATE scheduled_jobs SET delivery_reference = ?1, claimed_at = NULL WHERE id = ?2",
            params![reference.as_str(), id],
        )?;
        tx.commit()?;
        debug!(reference = %reference, "job marked delivered");
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn remove(&self, id: &str) -> Result<()> {
        let n = self
            .db()?
            .execute("DELETE FROM scheduled_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        debug!("job removed");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let db = self.db()?;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                 WHERE owner = ?1 ORDER BY schedule_time, rowid"
            ),
            params![owner.get()],
        )
    }

    #[instrument(skip(self), fields(owner = %owner, job_id = %id))]
    fn cancel_pending(&self, owner: OwnerId, id: &str) -> Result<()> {
        let mut db = self.db()?;
        let tx = db.transaction()?;
        let n = tx.execute(
            "DELETE FROM scheduled_jobs
             WHERE id = ?1 AND owner = ?2 AND delivery_reference IS NULL
               AND claimed_at IS NULL",
            params![id, owner.get()],
        )?;
        if n == 0 {
            let in_flight: bool = tx.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM scheduled_jobs
                     WHERE id = ?1 AND owner = ?2 AND delivery_reference IS NULL
                       AND claimed_at IS NOT NULL)",
                params![id, owner.get()],
                |row| row.get(0),
            )?;
            return Err(if in_flight {
                SchedulerError::JobInFlight { id: id.to_string() }
            } else {
                SchedulerError::JobNotFound { id: id.to_string() }
            });
        }
        tx.commit()?;
        info!("pending job cancelled by owner");
        Ok(())
    }
}

/// Map a row selected with `JOB_COLUMNS` to a [`ScheduledJob`].
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let kind_str: String = row.get(4)?;
    let kind: MessageKind = kind_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ScheduledJob {
        id: row.get(0)?,
        owner: OwnerId(row.get(1)?),
        target: TargetId(row.get(2)?),
        content: row.get(3)?,
        kind,
        schedule_time: ts_column(row, 5)?,
        delete_time: match row.get::<_, Option<String>>(6)? {
            Some(_) => Some(ts_column(row, 6)?),
            None => None,
        },
        delivery_reference: row.get::<_, Option<String>>(7)?.map(DeliveryReference),
        recurrence: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
