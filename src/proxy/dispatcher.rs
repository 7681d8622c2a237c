//! Request dispatch
//!
//! Resolves the addressed host through the routing table and hands the
//! request (or upgraded connection) to the forwarding engine. Unrouted hosts
//! get the 404 not-found response; that is a routine outcome, not an error.

use crate::error::ProxyError;
use crate::http::parser::MAX_BODY_SIZE;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::auth::split_www_authenticate;
use crate::proxy::routing::RoutingTable;
use crate::proxy::upstream::{ForwardMeta, ForwardingEngine, Io, Protocol};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;

/// What happened to an upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Relayed to a backend until one side closed
    Relayed,
    /// No route; the client got a 404 and the connection was closed
    Refused,
    /// A backend was chosen but the relay failed
    Failed,
}

pub struct Dispatcher<E> {
    routes: RoutingTable,
    engine: E,
    ntlm: bool,
    max_body: usize,
}

impl<E: ForwardingEngine> Dispatcher<E> {
    pub fn new(routes: RoutingTable, engine: E) -> Self {
        Self {
            routes,
            engine,
            ntlm: false,
            max_body: MAX_BODY_SIZE,
        }
    }

    /// Enables the `WWW-Authenticate` split for NTLM/Negotiate backends.
    pub fn with_ntlm(mut self, ntlm: bool) -> Self {
        self.ntlm = ntlm;
        self
    }

    /// Largest request body accepted from clients.
    pub fn with_max_body_size(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Picks the backend for the request's Host, advancing rotation.
    pub async fn resolve(&self, request: &Request) -> Option<String> {
        let host = request.host()?;
        self.routes.resolve(host).await
    }

    /// Relays an ordinary request and returns the response for the client.
    pub async fn handle(
        &self,
        request: &Request,
        client_addr: SocketAddr,
        protocol: Protocol,
    ) -> Response {
        let Some(target) = self.resolve(request).await else {
            tracing::debug!(
                host = request.host().unwrap_or(""),
                path = %request.path,
                "No route for host"
            );
            return Response::not_found();
        };

        let meta = forward_meta(request, client_addr, protocol);

        match self.engine.forward(request, &target, &meta).await {
            Ok(mut response) => {
                if self.ntlm {
                    split_www_authenticate(&mut response.headers);
                }
                response
            }
            Err(ProxyError::UpstreamTimeout { target }) => {
                tracing::warn!(backend = %target, path = %request.path, "Backend timed out");
                Response::gateway_timeout()
            }
            Err(e) => {
                tracing::warn!(backend = %target, error = %e, path = %request.path, "Failed to proxy request");
                Response::bad_gateway()
            }
        }
    }

    /// Relays a protocol-upgrade request, taking over the client stream.
    ///
    /// `head` is whatever the client sent after the handshake.
    pub async fn handle_upgrade<S: Io + 'static>(
        &self,
        request: &Request,
        mut client: S,
        head: Vec<u8>,
        client_addr: SocketAddr,
        protocol: Protocol,
    ) -> anyhow::Result<UpgradeOutcome> {
        let Some(target) = self.resolve(request).await else {
            tracing::debug!(host = request.host().unwrap_or(""), "Upgrade refused, no route");
            ResponseWriter::new(&Response::not_found())
                .write_to_stream(&mut client)
                .await?;
            client.shutdown().await?;
            return Ok(UpgradeOutcome::Refused);
        };

        let meta = forward_meta(request, client_addr, protocol);

        match self
            .engine
            .forward_upgrade(request, client, head, &target, &meta)
            .await
        {
            Ok(()) => Ok(UpgradeOutcome::Relayed),
            Err(e) => {
                tracing::warn!(backend = %target, error = %e, "Upgrade relay failed");
                Ok(UpgradeOutcome::Failed)
            }
        }
    }
}

fn forward_meta(request: &Request, client_addr: SocketAddr, protocol: Protocol) -> ForwardMeta {
    ForwardMeta::new(
        client_addr,
        protocol,
        request.header("Host").map(str::to_string),
    )
}
