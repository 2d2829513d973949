//! switchboard-gateway: the running service
//!
//! Owns the channel adapters, routes their inbound messages to agent
//! instances, drives the heartbeat trigger and serves the status API.

pub mod auth;
pub mod gateway;
pub mod heartbeat;
pub mod server;

pub use gateway::{Gateway, GatewayStatus, routing_context};
pub use heartbeat::{HeartbeatService, HeartbeatSettings};
pub use server::StatusServer;
