//! Reverse proxy functionality
//!
//! Host-based routing with per-host round-robin, request dispatch, and the
//! forwarding engine that talks to backends.

pub mod auth;
pub mod dispatcher;
pub mod routing;
pub mod tls;
pub mod upstream;

pub use dispatcher::{Dispatcher, UpgradeOutcome};
pub use routing::{RotationPolicy, RouteSnapshot, RoutingTable};
pub use upstream::{ForwardMeta, ForwardingEngine, HttpForwarder, Protocol};
