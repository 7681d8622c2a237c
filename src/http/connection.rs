use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use crate::http::parser::{parse_request_with_limit, ParseError, MAX_HEAD_SIZE};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::upstream::{ForwardingEngine, Io, Protocol};

/// One accepted client connection, plain or TLS.
pub struct Connection<S, E> {
    stream: S,
    buffer: Vec<u8>,
    state: ConnectionState,
    dispatcher: Arc<Dispatcher<E>>,
    peer: SocketAddr,
    protocol: Protocol,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Upgrading(Request),
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Eof,
    Malformed(ParseError),
}

impl<S: Io + 'static, E: ForwardingEngine> Connection<S, E> {
    pub fn new(
        stream: S,
        dispatcher: Arc<Dispatcher<E>>,
        peer: SocketAddr,
        protocol: Protocol,
    ) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            dispatcher,
            peer,
            protocol,
        }
    }

    /// Serves requests until the client closes, a response asks to close,
    /// or the connection is handed off as an upgrade.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Processing(req),
                        ReadOutcome::Eof => ConnectionState::Closed,
                        ReadOutcome::Malformed(ParseError::BodyTooLarge) => {
                            tracing::debug!(peer = %self.peer, "Request body over limit");
                            let response = Response::payload_too_large();
                            ConnectionState::Writing(ResponseWriter::new(&response), false)
                        }
                        ReadOutcome::Malformed(e) => {
                            tracing::debug!(peer = %self.peer, error = ?e, "Malformed request");
                            ConnectionState::Writing(ResponseWriter::new(&Response::bad_request()), false)
                        }
                    };
                }

                ConnectionState::Processing(req) => {
                    if req.is_upgrade() {
                        self.state = ConnectionState::Upgrading(req);
                        continue;
                    }

                    let mut response = self
                        .dispatcher
                        .handle(&req, self.peer, self.protocol)
                        .await;

                    let keep_alive = req.keep_alive()
                        && response.status != StatusCode::NotFound
                        && !response
                            .header("Connection")
                            .is_some_and(|v| v.eq_ignore_ascii_case("close"));

                    response
                        .headers
                        .insert("Connection", if keep_alive { "keep-alive" } else { "close" });

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    }
                }

                ConnectionState::Upgrading(req) => {
                    // the stream now belongs to the relay
                    let head = std::mem::take(&mut self.buffer);
                    let outcome = self
                        .dispatcher
                        .handle_upgrade(&req, self.stream, head, self.peer, self.protocol)
                        .await?;
                    tracing::debug!(peer = %self.peer, outcome = ?outcome, "Upgrade finished");
                    return Ok(());
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        let max_body = self.dispatcher.max_body_size();

        loop {
            // Try parsing whatever we already have
            match parse_request_with_limit(&self.buffer, max_body) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                // chunk framing and trailers are not counted by the parser
                Err(ParseError::Incomplete)
                    if self.buffer.len() > MAX_HEAD_SIZE.saturating_add(max_body).saturating_mul(2) =>
                {
                    return Ok(ReadOutcome::Malformed(ParseError::BodyTooLarge));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
