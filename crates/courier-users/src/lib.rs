//! `courier-users`: who may operate the bot and where it may deliver.
//!
//! Operators carry one boolean flag per [`Capability`]; the composition
//! session only asks [`CapabilityCheck::has_capability`]. Registered groups
//! form the set of known delivery targets exposed through [`TargetDirectory`].

pub mod db;
pub mod error;
pub mod groups;
pub mod permissions;
pub mod types;

pub use error::{Result, UserError};
pub use groups::{GroupStore, TargetDirectory};
pub use permissions::{CapabilityCheck, OperatorStore};
pub use types::{Capability, Group, Operator};
