//! `courier-telegram`: Telegram binding for courier: the delivery gateway the
//! dispatcher calls, and the long-polling adapter that turns private-chat
//! messages, button presses and commands into composition events.

pub mod adapter;
pub mod callback;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod render;

pub use adapter::TelegramAdapter;
pub use context::CourierContext;
pub use error::TelegramError;
pub use gateway::TelegramGateway;
