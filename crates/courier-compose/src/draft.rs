//! Owner-keyed holding area for in-progress compositions.
//!
//! Each owner with work in progress has one slot guarded by its own async
//! mutex. Holding a [`DraftSlot`] is what serializes events for that owner;
//! different owners never contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use courier_core::{MessageItem, OwnerId, TargetId};
use courier_scheduler::NewJob;

use crate::error::{ComposeError, Result};
use crate::machine::CompositionState;

/// Ephemeral, owner-scoped composition content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub owner: OwnerId,
    /// Delivery order.
    pub items: Vec<MessageItem>,
    pub target: Option<TargetId>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub delete_time: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(owner: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            owner,
            items: Vec::new(),
            target: None,
            schedule_time: None,
            delete_time: None,
            started_at: now,
        }
    }

    /// Fan the draft out into one job per item, in item order.
    pub fn to_jobs(&self) -> Result<Vec<NewJob>> {
        let target = self
            .target
            .ok_or_else(|| ComposeError::Validation("no target selected".to_string()))?;
        let schedule_time = self
            .schedule_time
            .ok_or_else(|| ComposeError::Validation("no send time selected".to_string()))?;
        if self.items.is_empty() {
            return Err(ComposeError::Validation("nothing collected".to_string()));
        }
        Ok(self
            .items
            .iter()
            .map(|item| NewJob::from_item(self.owner, target, item, schedule_time, self.delete_time))
            .collect())
    }
}

/// A live composition: where the owner is in the flow, and what they built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: CompositionState,
    pub draft: Draft,
}

/// Per-owner draft slots.
///
/// A slot exists only while its owner has a session or an event in flight;
/// [`DraftStore::release`] evicts it once it is idle again.
#[derive(Default)]
pub struct DraftStore {
    slots: DashMap<OwnerId, Arc<Mutex<Option<Session>>>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `owner`'s slot.
    pub async fn acquire(&self, owner: OwnerId) -> DraftSlot {
        // Clone the Arc so the map shard is unlocked before awaiting.
        let cell = self.slots.entry(owner).or_default().clone();
        DraftSlot {
            owner,
            guard: cell.lock_owned().await,
        }
    }

    /// Give a slot back, dropping the map entry if nothing is in progress.
    pub fn release(&self, slot: DraftSlot) {
        let owner = slot.owner;
        drop(slot);
        // Under the shard lock nobody can clone the cell, so a count of one
        // means no other task is waiting on it.
        self.slots.remove_if(&owner, |_, cell| {
            Arc::strong_count(cell) == 1 && cell.try_lock().map(|s| s.is_none()).unwrap_or(false)
        });
    }

    /// Copy of the owner's session, without creating a slot for them.
    pub async fn snapshot(&self, owner: OwnerId) -> Option<Session> {
        let cell = self.slots.get(&owner).map(|entry| Arc::clone(entry.value()))?;
        let session = cell.lock().await.clone();
        session
    }

    pub async fn state_of(&self, owner: OwnerId) -> CompositionState {
        self.snapshot(owner)
            .await
            .map_or(CompositionState::Idle, |s| s.state)
    }

    /// Owners that currently hold a slot.
    pub fn active_owners(&self) -> usize {
        self.slots.len()
    }
}

/// Exclusive handle to one owner's slot; released on drop.
pub struct DraftSlot {
    owner: OwnerId,
    guard: OwnedMutexGuard<Option<Session>>,
}

impl DraftSlot {
    pub fn state(&self) -> CompositionState {
        self.guard
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(CompositionState::Idle)
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.guard.as_ref().map(|s| &s.draft)
    }

    /// Replace whatever the owner had in progress.
    pub fn set(&mut self, session: Session) {
        *self.guard = Some(session);
    }

    pub fn clear(&mut self) {
        *self.guard = None;
    }
}
