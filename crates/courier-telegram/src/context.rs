//! Shared state handed to every Telegram handler.

use std::sync::Arc;

use chrono::FixedOffset;

use courier_compose::Composer;
use courier_scheduler::JobStore;
use courier_users::{GroupStore, OperatorStore};

pub struct CourierContext {
    pub composer: Composer,
    pub operators: OperatorStore,
    pub groups: GroupStore,
    pub jobs: Arc<dyn JobStore>,
    /// Zone operators read and type times in.
    pub offset: FixedOffset,
}
