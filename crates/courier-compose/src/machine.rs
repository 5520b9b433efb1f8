//! Composition states, events and the transition table between them.

use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};

use courier_core::{MessageItem, TargetId};

use crate::draft::Draft;
use crate::error::{ComposeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositionState {
    Idle,
    CollectingContent,
    SelectingTarget,
    SelectingScheduleTime,
    ConfirmingAutoDelete,
    SelectingDeleteTime,
}

impl fmt::Display for CompositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompositionState::Idle => "idle",
            CompositionState::CollectingContent => "collecting content",
            CompositionState::SelectingTarget => "selecting a target",
            CompositionState::SelectingScheduleTime => "selecting a send time",
            CompositionState::ConfirmingAutoDelete => "confirming auto-delete",
            CompositionState::SelectingDeleteTime => "selecting a delete time",
        };
        f.write_str(s)
    }
}

/// Raw content as it arrived from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingContent {
    Text(String),
    Photo(String),
    Video(String),
    /// Anything else (stickers, documents, voice...), named for the reply.
    Unsupported(String),
}

impl IncomingContent {
    fn into_item(self) -> Result<MessageItem> {
        match self {
            IncomingContent::Text(text) => Ok(MessageItem::text(text)),
            IncomingContent::Photo(file) => Ok(MessageItem::photo(file)),
            IncomingContent::Video(file) => Ok(MessageItem::video(file)),
            IncomingContent::Unsupported(kind) => Err(ComposeError::Validation(format!(
                "unsupported content type: {kind}; send text, a photo or a video"
            ))),
        }
    }
}

/// A send or delete time: a fixed offset or an absolute instant.
///
/// Offsets count from "now" for the send time and from the send time for the
/// delete time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChoice {
    In30Seconds,
    In5Minutes,
    In1Hour,
    At(DateTime<Utc>),
}

impl TimeChoice {
    /// Whole-second instant this choice denotes relative to `base`.
    pub fn resolve(self, base: DateTime<Utc>) -> DateTime<Utc> {
        let at = match self {
            TimeChoice::In30Seconds => base + Duration::seconds(30),
            TimeChoice::In5Minutes => base + Duration::minutes(5),
            TimeChoice::In1Hour => base + Duration::hours(1),
            TimeChoice::At(at) => at,
        };
        at.trunc_subsecs(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionEvent {
    Start,
    Content(IncomingContent),
    /// The distinguished end-of-collection token.
    EndOfInput,
    SelectTarget(TargetId),
    SelectScheduleTime(TimeChoice),
    ConfirmAutoDelete(bool),
    SelectDeleteTime(TimeChoice),
    Cancel,
}

impl CompositionEvent {
    fn name(&self) -> &'static str {
        match self {
            CompositionEvent::Start => "start",
            CompositionEvent::Content(_) => "content",
            CompositionEvent::EndOfInput => "end of input",
            CompositionEvent::SelectTarget(_) => "target selection",
            CompositionEvent::SelectScheduleTime(_) => "send time selection",
            CompositionEvent::ConfirmAutoDelete(_) => "auto-delete choice",
            CompositionEvent::SelectDeleteTime(_) => "delete time selection",
            CompositionEvent::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Cancelled,
    NothingCollected,
}

/// Side effect the caller must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Keep the (possibly mutated) draft under the new state.
    Continue,
    /// Throw away any prior draft and start an empty one.
    Begin,
    /// Drop the draft without persisting anything.
    Discard(DiscardReason),
    /// Persist one job per item, then drop the draft.
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: CompositionState,
    pub effect: Effect,
}

impl Transition {
    fn to(next: CompositionState) -> Self {
        Self {
            next,
            effect: Effect::Continue,
        }
    }

    fn idle(effect: Effect) -> Self {
        Self {
            next: CompositionState::Idle,
            effect,
        }
    }
}

/// Apply `event` in `state`, mutating `draft` in place.
///
/// On `Err` the caller must discard the mutated draft; callers pass a clone.
/// Capability and target-existence checks happen before this is called.
pub fn transition(
    state: CompositionState,
    draft: &mut Draft,
    event: CompositionEvent,
    now: DateTime<Utc>,
) -> Result<Transition> {
    use CompositionEvent as E;
    use CompositionState as S;

    match (state, event) {
        (_, E::Start) => Ok(Transition {
            next: S::CollectingContent,
            effect: Effect::Begin,
        }),

        (S::Idle, _) => Err(ComposeError::NotFound(
            "no composition in progress".to_string(),
        )),

        (_, E::Cancel) => Ok(Transition::idle(Effect::Discard(DiscardReason::Cancelled))),

        (S::CollectingContent, E::Content(content)) => {
            draft.items.push(content.into_item()?);
            Ok(Transition::to(S::CollectingContent))
        }

        (S::CollectingContent, E::EndOfInput) => {
            if draft.items.is_empty() {
                Ok(Transition::idle(Effect::Discard(
                    DiscardReason::NothingCollected,
                )))
            } else {
                Ok(Transition::to(S::SelectingTarget))
            }
        }

        (S::SelectingTarget, E::SelectTarget(target)) => {
            draft.target = Some(target);
            Ok(Transition::to(S::SelectingScheduleTime))
        }

        // An absolute time in the past is accepted; it goes out on the next tick.
        (S::SelectingScheduleTime, E::SelectScheduleTime(choice)) => {
            draft.schedule_time = Some(choice.resolve(now));
            Ok(Transition::to(S::ConfirmingAutoDelete))
        }

        (S::ConfirmingAutoDelete, E::ConfirmAutoDelete(false)) => {
            Ok(Transition::idle(Effect::Finalize))
        }

        (S::ConfirmingAutoDelete, E::ConfirmAutoDelete(true)) => {
            Ok(Transition::to(S::SelectingDeleteTime))
        }

        (S::SelectingDeleteTime, E::SelectDeleteTime(choice)) => {
            let schedule_time = draft.schedule_time.ok_or_else(|| {
                ComposeError::Validation("send time must be chosen first".to_string())
            })?;
            let delete_time = choice.resolve(schedule_time);
            if delete_time <= schedule_time {
                return Err(ComposeError::Validation(
                    "delete time must be after the send time".to_string(),
                ));
            }
            draft.delete_time = Some(delete_time);
            Ok(Transition::idle(Effect::Finalize))
        }

        (state, event) => Err(ComposeError::Validation(format!(
            "{} is not accepted while {state}",
            event.name()
        ))),
    }
}
