//! Switchyard - host-routed reverse proxy
//!
//! Maps each request's Host to a list of backends, rotates through them
//! round-robin, relays plain requests and upgraded (WebSocket) connections,
//! and can replicate itself across supervised worker processes.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod proxy;
pub mod server;

pub use config::Config;
pub use error::{ProxyError, Result};
