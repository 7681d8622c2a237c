//! Listeners and process supervision.
//!
//! A worker is one full stack: routing table, dispatcher and listeners.
//! `run_worker` builds and serves it; `supervisor` replicates it across
//! processes.

pub mod listener;
pub mod supervisor;
pub mod tls;

use std::sync::Arc;

use crate::config::Config;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::routing::RoutingTable;
use crate::proxy::upstream::HttpForwarder;

pub use listener::ListenerSupervisor;
pub use supervisor::{ProcessLauncher, ProcessSupervisor, RestartPolicy, SupervisorEvent};

/// Builds the dispatcher a worker serves with, replaying the configured
/// routes in file order.
pub async fn build_dispatcher(cfg: &Config) -> Dispatcher<HttpForwarder> {
    let routes = RoutingTable::from_snapshot(&cfg.snapshot(), cfg.server.rotation).await;

    let engine = HttpForwarder::new(cfg.server.connect_timeout(), cfg.server.request_timeout())
        .with_xfwd(cfg.server.xfwd)
        .with_secure(cfg.server.secure)
        .with_max_body_size(cfg.server.max_body_size);

    Dispatcher::new(routes, engine)
        .with_ntlm(cfg.server.ntlm)
        .with_max_body_size(cfg.server.max_body_size)
}

/// Runs one worker stack until a listener fails.
pub async fn run_worker(cfg: &Config) -> anyhow::Result<()> {
    let dispatcher = Arc::new(build_dispatcher(cfg).await);

    tracing::info!(
        hosts = dispatcher.routes().len().await,
        "Routes loaded"
    );

    listener::run(cfg, dispatcher).await
}
