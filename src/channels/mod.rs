//! External communication channels.
//!
//! Outbound reminder delivery goes through the [`traits::Messenger`] port
//! (Discord REST in production). Inbound commands and chat arrive over the
//! HTTP gateway.

pub mod discord;
pub mod gateway;
pub mod traits;

pub use discord::DiscordMessenger;
pub use gateway::{GatewayState, router, run_gateway, spawn_keepalive};
pub use traits::{ChannelRef, DispatchError, Messenger, ReminderNotification, UserRef};
