//! `courier-compose`: the owner-scoped composition session that turns
//! operator input into scheduled jobs.
//!
//! ```text
//! Idle ─Start─▶ CollectingContent ─END─▶ SelectingTarget ─▶ SelectingScheduleTime
//!                                                              │
//!                         Idle ◀─No── ConfirmingAutoDelete ◀──┘
//!                           ▲               │Yes
//!                           └── SelectingDeleteTime
//! ```
//!
//! [`machine::transition`] is the pure transition table; [`Composer`] wraps it
//! with the capability gate, target lookup and persistence, and serializes
//! events per owner through the [`DraftStore`].

pub mod draft;
pub mod error;
pub mod machine;
pub mod session;
pub mod timepick;

pub use draft::{Draft, DraftSlot, DraftStore, Session};
pub use error::{ComposeError, Result};
pub use machine::{CompositionEvent, CompositionState, IncomingContent, TimeChoice};
pub use session::{Composer, Reply};
