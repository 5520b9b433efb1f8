//! `courier-core`: types, configuration and collaborator interfaces shared by
//! every courier crate.

pub mod config;
pub mod delivery;
pub mod error;
pub mod types;

pub use delivery::{DeliveryError, DeliveryGateway};
pub use error::{CourierError, Result};
pub use types::{DeliveryReference, MessageItem, MessageKind, OwnerId, TargetId};
