pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod session;
pub mod signature;
pub mod sink;
pub mod telemetry;
pub mod webhook;
pub mod wsproto;

pub mod daemon;
