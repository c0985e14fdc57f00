pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod permissions;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod signals;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ChatConfig;
pub use error::ChatError;
pub use registry::ConnectionRegistry;
pub use service::ChatService;
