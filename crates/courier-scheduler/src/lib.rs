//! `courier-scheduler`: durable scheduled-message jobs and the reconciler
//! that delivers and later deletes them.
//!
//! # Overview
//!
//! Finalized compositions are persisted to the SQLite `scheduled_jobs` table,
//! one row per content item. The [`dispatcher::Dispatcher`] polls the store on
//! a fixed interval and, per tick:
//!
//! 1. sends every job whose `schedule_time` has arrived and that has no
//!    `delivery_reference` yet;
//! 2. deletes every delivered job whose `delete_time` has arrived.
//!
//! # Job lifecycle
//!
//! | State              | Condition                                   | Next                      |
//! |--------------------|---------------------------------------------|---------------------------|
//! | pending            | `delivery_reference IS NULL`                | sent → removed / awaiting |
//! | awaiting deletion  | `delivery_reference` set, `delete_time` set | deleted → removed         |
//!
//! Failed gateway calls leave the row untouched; it is retried next tick.

pub mod db;
pub mod dispatcher;
pub mod error;
pub mod store;
pub mod types;

pub use dispatcher::{Dispatcher, TickReport};
pub use error::{Result, SchedulerError};
pub use store::{JobStore, SqliteJobStore};
pub use types::{NewJob, ScheduledJob};
