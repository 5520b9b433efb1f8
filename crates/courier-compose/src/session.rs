use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use courier_core::{MessageItem, OwnerId};
use courier_scheduler::{JobStore, ScheduledJob};
use courier_users::{Capability, CapabilityCheck, Group, TargetDirectory};

use crate::draft::{Draft, DraftSlot, DraftStore, Session};
use crate::error::{ComposeError, Result};
use crate::machine::{self, CompositionEvent, CompositionState, DiscardReason, Effect};

/// What the front-end should tell the owner after an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A fresh draft exists; waiting for content.
    Started,
    ItemRecorded { count: usize },
    /// Collection finished; pick one of `targets`.
    ChooseTarget {
        items: Vec<MessageItem>,
        targets: Vec<Group>,
    },
    ChooseScheduleTime { target: Group },
    ConfirmAutoDelete { schedule_time: DateTime<Utc> },
    ChooseDeleteTime { schedule_time: DateTime<Utc> },
    /// Finalized; the persisted jobs in item order.
    Scheduled { jobs: Vec<ScheduledJob> },
    NothingCollected,
    Cancelled,
}

/// The composition session front door.
///
/// Serializes events per owner, applies the capability gate on start,
/// resolves targets and persists finalized drafts.
pub struct Composer {
    drafts: DraftStore,
    auth: Arc<dyn CapabilityCheck>,
    jobs: Arc<dyn JobStore>,
    targets: Arc<dyn TargetDirectory>,
}

impl Composer {
    pub fn new(
        auth: Arc<dyn CapabilityCheck>,
        jobs: Arc<dyn JobStore>,
        targets: Arc<dyn TargetDirectory>,
    ) -> Self {
        Self {
            drafts: DraftStore::new(),
            auth,
            jobs,
            targets,
        }
    }

    pub async fn handle(&self, owner: OwnerId, event: CompositionEvent) -> Result<Reply> {
        self.handle_at(owner, event, Utc::now()).await
    }

    pub async fn state_of(&self, owner: OwnerId) -> CompositionState {
        self.drafts.state_of(owner).await
    }

    /// Snapshot of the owner's draft, if a composition is in progress.
    pub async fn draft_of(&self, owner: OwnerId) -> Option<Draft> {
        self.drafts.snapshot(owner).await.map(|s| s.draft)
    }

    pub async fn items_of(&self, owner: OwnerId) -> Option<Vec<MessageItem>> {
        self.draft_of(owner).await.map(|d| d.items)
    }

    /// Owners with a composition in progress.
    pub fn active_sessions(&self) -> usize {
        self.drafts.active_owners()
    }

    /// Map the owner's current state to an event and process it, all under
    /// one hold of the owner's slot.
    ///
    /// `map` returning `Ok(None)` means there is nothing to process; the
    /// session is left untouched.
    pub async fn handle_with<F>(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
        map: F,
    ) -> Result<Option<Reply>>
    where
        F: FnOnce(CompositionState) -> Result<Option<CompositionEvent>> + Send,
    {
        let mut slot = self.drafts.acquire(owner).await;
        let result = match map(slot.state()) {
            Ok(Some(event)) => self.process(&mut slot, owner, event, now).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.drafts.release(slot);
        result
    }

    /// Process one event as of `now`.
    ///
    /// On any error the owner's session is left exactly as it was, except for
    /// a denied start, which clears it.
    #[instrument(skip(self, event, now), fields(owner = %owner))]
    pub async fn handle_at(
        &self,
        owner: OwnerId,
        event: CompositionEvent,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        let mut slot = self.drafts.acquire(owner).await;
        let result = self.process(&mut slot, owner, event, now);
        self.drafts.release(slot);
        result
    }

    fn process(
        &self,
        slot: &mut DraftSlot,
        owner: OwnerId,
        event: CompositionEvent,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        let state = slot.state();

        if event == CompositionEvent::Start && !self.auth.has_capability(owner, Capability::CanSchedule) {
            slot.clear();
            warn!("composition refused: missing can_schedule");
            return Err(ComposeError::PermissionDenied { owner });
        }

        let target = match (&state, &event) {
            (CompositionState::SelectingTarget, CompositionEvent::SelectTarget(id)) => Some(
                self.targets
                    .lookup(*id)?
                    .ok_or_else(|| ComposeError::NotFound(format!("target {id}")))?,
            ),
            _ => None,
        };

        let mut draft = slot
            .draft()
            .cloned()
            .unwrap_or_else(|| Draft::new(owner, now));
        let step = machine::transition(state, &mut draft, event, now)?;
        debug!(from = %state, to = %step.next, effect = ?step.effect, "composition transition");

        match step.effect {
            Effect::Begin => {
                slot.set(Session {
                    state: step.next,
                    draft: Draft::new(owner, now),
                });
                info!("composition started");
                Ok(Reply::Started)
            }
            Effect::Discard(reason) => {
                slot.clear();
                info!(?reason, "composition discarded");
                Ok(match reason {
                    DiscardReason::Cancelled => Reply::Cancelled,
                    DiscardReason::NothingCollected => Reply::NothingCollected,
                })
            }
            Effect::Finalize => {
                let jobs = self.jobs.insert_all(draft.to_jobs()?)?;
                slot.clear();
                info!(
                    jobs = jobs.len(),
                    draft_age_secs = (now - draft.started_at).num_seconds(),
                    "composition finalized"
                );
                Ok(Reply::Scheduled { jobs })
            }
            Effect::Continue => {
                let reply = match step.next {
                    CompositionState::SelectingTarget => Reply::ChooseTarget {
                        items: draft.items.clone(),
                        targets: self.targets.known_targets()?,
                    },
                    CompositionState::SelectingScheduleTime => match target {
                        Some(target) => Reply::ChooseScheduleTime { target },
                        None => {
                            return Err(ComposeError::Validation("no target selected".to_string()))
                        }
                    },
                    CompositionState::ConfirmingAutoDelete => Reply::ConfirmAutoDelete {
                        schedule_time: draft.schedule_time.unwrap_or(now),
                    },
                    CompositionState::SelectingDeleteTime => Reply::ChooseDeleteTime {
                        schedule_time: draft.schedule_time.unwrap_or(now),
                    },
                    CompositionState::CollectingContent | CompositionState::Idle => {
                        Reply::ItemRecorded {
                            count: draft.items.len(),
                        }
                    }
                };
                slot.set(Session {
                    state: step.next,
                    draft,
                });
                Ok(reply)
            }
        }
    }
}
