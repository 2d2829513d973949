//! Channel adapter registry and built-in adapters for switchboard
//!
//! Platform adapters implement `switchboard_core::ChannelAdapter`; this crate
//! keys them by (channel, account) and feeds their inbound messages into one
//! queue.

pub mod console;
pub mod registry;

// Re-export main types
pub use console::{CONSOLE_CHANNEL, ConsoleChannel};
pub use registry::AdapterRegistry;
