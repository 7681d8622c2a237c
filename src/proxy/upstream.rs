//! Upstream connection and request forwarding
//!
//! `ForwardingEngine` is the seam between the dispatcher and the byte relay.
//! `HttpForwarder` is the engine the binary uses: one upstream connection
//! per request (`Connection: close`), buffered bodies, and raw
//! bidirectional copying for upgraded connections.

use crate::error::{ProxyError, Result};
use crate::http::chunked::decode_chunked;
use crate::http::headers::Headers;
use crate::http::parser::{find_headers_end, ParseError, MAX_BODY_SIZE, MAX_HEAD_SIZE};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::proxy::tls;
use anyhow::Context;
use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Hop-by-hop headers never relayed in either direction.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// Any bidirectional byte stream the proxy can relay over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Protocol the client used to reach the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

/// Client-side facts the engine needs to rewrite outbound headers.
#[derive(Debug, Clone)]
pub struct ForwardMeta {
    /// Address of the connected client
    pub client_addr: SocketAddr,
    /// Protocol of the inbound listener
    pub protocol: Protocol,
    /// The client's original Host header, used as the outbound Host
    pub host: Option<String>,
}

impl ForwardMeta {
    pub fn new(client_addr: SocketAddr, protocol: Protocol, host: Option<String>) -> Self {
        Self {
            client_addr,
            protocol,
            host,
        }
    }

    /// Port the client addressed: the Host header's port, else the
    /// protocol default.
    pub fn forwarded_port(&self) -> u16 {
        self.host
            .as_deref()
            .and_then(|h| h.rsplit_once(':'))
            .filter(|(host, _)| !host.contains(':') || host.ends_with(']'))
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or_else(|| self.protocol.default_port())
    }
}

/// Relays requests and upgraded connections to a chosen target.
pub trait ForwardingEngine: Send + Sync + 'static {
    /// Sends `request` to `target` and returns the backend's response.
    fn forward(
        &self,
        request: &Request,
        target: &str,
        meta: &ForwardMeta,
    ) -> impl Future<Output = Result<Response>> + Send;

    /// Replays the upgrade handshake to `target`, then relays bytes between
    /// `client` and the backend until either side closes. `head` holds any
    /// bytes the client sent after the handshake.
    fn forward_upgrade<S: Io + 'static>(
        &self,
        request: &Request,
        client: S,
        head: Vec<u8>,
        target: &str,
        meta: &ForwardMeta,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Forwarding engine speaking HTTP/1.1 to backends, over TLS for
/// `https://` targets.
#[derive(Clone)]
pub struct HttpForwarder {
    /// Connection timeout duration
    connection_timeout: Duration,

    /// Request timeout duration
    request_timeout: Duration,

    /// Whether to append X-Forwarded-* headers
    xfwd: bool,

    /// Largest backend response body relayed
    max_body: usize,

    tls: TlsConnector,
}

impl HttpForwarder {
    /// Create a new forwarder
    pub fn new(connection_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            request_timeout,
            xfwd: true,
            max_body: MAX_BODY_SIZE,
            tls: tls::connector(true),
        }
    }

    pub fn with_xfwd(mut self, xfwd: bool) -> Self {
        self.xfwd = xfwd;
        self
    }

    /// With `secure` off, `https://` backends are accepted whatever
    /// certificate they present.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.tls = tls::connector(secure);
        self
    }

    pub fn with_max_body_size(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Build HTTP request bytes to send to backend
    ///
    /// The outbound Host is the client's original Host header when there is
    /// one, otherwise the backend's own authority.
    pub fn build_http_request(
        &self,
        request: &Request,
        backend_url: &Url,
        meta: &ForwardMeta,
    ) -> Vec<u8> {
        let mut headers = self.outbound_headers(request, backend_url, meta);

        for name in HOP_BY_HOP {
            headers.remove(name);
        }
        // the body is already buffered, nothing to wait for
        headers.remove("Expect");
        headers.insert("Connection", "close");

        if !request.body.is_empty() {
            headers.insert("Content-Length", request.body.len().to_string());
        }

        let mut buffer = request_head(request, backend_url, &headers);
        buffer.extend_from_slice(&request.body);
        buffer
    }

    /// Build the handshake sent to the backend for an upgrade request.
    ///
    /// Unlike `build_http_request` the `Connection` and `Upgrade` headers
    /// are kept so the backend can switch protocols.
    pub fn build_upgrade_request(
        &self,
        request: &Request,
        backend_url: &Url,
        meta: &ForwardMeta,
    ) -> Vec<u8> {
        let headers = self.outbound_headers(request, backend_url, meta);
        let mut buffer = request_head(request, backend_url, &headers);
        buffer.extend_from_slice(&request.body);
        buffer
    }

    fn outbound_headers(&self, request: &Request, backend_url: &Url, meta: &ForwardMeta) -> Headers {
        let mut headers = request.headers.clone();

        let host_value = match meta.host.as_deref() {
            Some(host) => host.to_string(),
            None => backend_authority(backend_url),
        };
        headers.insert("Host", host_value);

        if self.xfwd {
            append_forwarded(&mut headers, "X-Forwarded-For", &meta.client_addr.ip().to_string());
            append_forwarded(&mut headers, "X-Forwarded-Port", &meta.forwarded_port().to_string());
            append_forwarded(&mut headers, "X-Forwarded-Proto", meta.protocol.as_str());
        }

        headers
    }

    /// Opens a connection to the backend, wrapped in TLS for https.
    async fn connect(&self, url: &Url) -> anyhow::Result<Box<dyn Io>> {
        let host = url.host_str().context("Backend URL missing host")?;
        let port = url.port_or_known_default().unwrap_or(80);

        let stream = TcpStream::connect((host.trim_start_matches('[').trim_end_matches(']'), port))
            .await
            .context("Failed to connect to backend")?;
        stream.set_nodelay(true)?;

        if url.scheme() == "https" {
            let server_name = ServerName::try_from(host.to_string())
                .context("Invalid TLS server name")?;
            let tls = self
                .tls
                .connect(server_name, stream)
                .await
                .context("TLS handshake with backend failed")?;
            return Ok(Box::new(tls));
        }

        Ok(Box::new(stream))
    }

    async fn connect_with_timeout(&self, url: &Url, target: &str) -> Result<Box<dyn Io>> {
        timeout(self.connection_timeout, self.connect(url))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout {
                target: target.to_string(),
            })?
            .map_err(|e| ProxyError::upstream(target, format!("{e:#}")))
    }
}

impl ForwardingEngine for HttpForwarder {
    async fn forward(&self, request: &Request, target: &str, meta: &ForwardMeta) -> Result<Response> {
        let url = Url::parse(target).map_err(|e| ProxyError::upstream(target, e))?;
        let mut stream = self.connect_with_timeout(&url, target).await?;

        tracing::trace!(backend = target, "Connected to backend");

        let request_bytes = self.build_http_request(request, &url, meta);
        let head_only = request.method == Method::HEAD;

        let exchange = async {
            stream.write_all(&request_bytes).await?;
            stream.flush().await?;
            read_http_response(&mut stream, head_only, self.max_body).await
        };

        let response = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ProxyError::UpstreamTimeout {
                target: target.to_string(),
            })?
            .map_err(|e| ProxyError::upstream(target, format!("{e:#}")))?;

        tracing::debug!(
            backend = target,
            status = response.status.as_u16(),
            method = request.method.as_str(),
            path = %request.path,
            "Request forwarded"
        );

        Ok(response)
    }

    async fn forward_upgrade<S: Io + 'static>(
        &self,
        request: &Request,
        mut client: S,
        head: Vec<u8>,
        target: &str,
        meta: &ForwardMeta,
    ) -> Result<()> {
        let url = Url::parse(target).map_err(|e| ProxyError::upstream(target, e))?;
        let mut backend = self.connect_with_timeout(&url, target).await?;

        let mut handshake = self.build_upgrade_request(request, &url, meta);
        handshake.extend_from_slice(&head);
        backend.write_all(&handshake).await?;
        backend.flush().await?;

        let (from_client, from_backend) =
            tokio::io::copy_bidirectional(&mut client, &mut backend).await?;

        tracing::debug!(
            backend = target,
            upgrade = request.header("Upgrade").unwrap_or(""),
            from_client,
            from_backend,
            "Upgraded connection closed"
        );

        Ok(())
    }
}

fn backend_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn append_forwarded(headers: &mut Headers, name: &str, value: &str) {
    let joined = match headers.get(name) {
        Some(existing) if !existing.is_empty() => format!("{},{}", existing, value),
        _ => value.to_string(),
    };
    headers.insert(name, joined);
}

/// Request line plus headers. A target URL with a path prefixes it to the
/// request path.
fn request_head(request: &Request, backend_url: &Url, headers: &Headers) -> Vec<u8> {
    let path = if request.path.is_empty() {
        "/"
    } else {
        &request.path
    };

    let prefix = backend_url.path().trim_end_matches('/');
    let path = if prefix.is_empty() || !path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}{}", prefix, path)
    };

    let mut buffer = Vec::with_capacity(512);
    buffer.extend_from_slice(
        format!("{} {} {}\r\n", request.method.as_str(), path, request.version).as_bytes(),
    );

    for (key, value) in headers.iter() {
        buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    buffer.extend_from_slice(b"\r\n");
    buffer
}

/// Read HTTP response from backend
///
/// `head_only` is set for HEAD requests, whose responses never carry a body
/// whatever their Content-Length says. Bodies over `max_body` bytes are an
/// error.
pub async fn read_http_response<S>(
    stream: &mut S,
    head_only: bool,
    max_body: usize,
) -> anyhow::Result<Response>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }

        if let Some(headers_end) = find_headers_end(&buffer) {
            let head = buffer.split_to(headers_end + 4);
            let (status, mut headers) = parse_response_head(&head)?;

            let body = if head_only || status.forbids_body() {
                Vec::new()
            } else {
                let body = read_response_body(stream, &mut buffer, &headers, max_body).await?;
                headers.remove("Content-Length");
                body
            };

            for name in HOP_BY_HOP {
                headers.remove(name);
            }

            return Ok(Response::new(status).headers(headers).body(body).build());
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_HEAD_SIZE {
            anyhow::bail!("Response headers too large");
        }
    }
}

/// Parse the status line and headers of a backend response
fn parse_response_head(head: &[u8]) -> anyhow::Result<(StatusCode, Headers)> {
    let head = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;

    let mut lines = head.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let code: u16 = parts[1].parse().context("Invalid status code")?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok((StatusCode::from_u16(code), headers))
}

/// Read response body: chunked, Content-Length, or until close
async fn read_response_body<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    headers: &Headers,
    max_body: usize,
) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    if chunked {
        loop {
            match decode_chunked(buffer, max_body) {
                Ok((body, _)) => return Ok(body),
                Err(ParseError::Incomplete) => {}
                Err(ParseError::BodyTooLarge) => {
                    anyhow::bail!("Response body exceeds {} bytes", max_body)
                }
                Err(e) => anyhow::bail!("Malformed chunked body: {:?}", e),
            }

            // framing and trailers are bounded too
            if buffer.len() > MAX_HEAD_SIZE.saturating_add(max_body).saturating_mul(2) {
                anyhow::bail!("Response body exceeds {} bytes", max_body);
            }

            if stream.read_buf(buffer).await? == 0 {
                anyhow::bail!("Connection closed inside chunked body");
            }
        }
    }

    let Some(content_length) = headers.get("Content-Length") else {
        // No framing, the body runs until the backend closes
        let mut body = buffer.to_vec();
        let allowance = (max_body as u64).saturating_add(1).saturating_sub(body.len() as u64);
        (&mut *stream).take(allowance).read_to_end(&mut body).await?;

        if body.len() > max_body {
            anyhow::bail!("Response body exceeds {} bytes", max_body);
        }
        return Ok(body);
    };

    let content_length: usize = content_length
        .trim()
        .parse()
        .context("Invalid Content-Length from backend")?;

    if content_length > max_body {
        anyhow::bail!("Response body of {} bytes exceeds {} bytes", content_length, max_body);
    }

    while buffer.len() < content_length {
        if stream.read_buf(buffer).await? == 0 {
            anyhow::bail!("Connection closed before complete body received");
        }
    }

    Ok(buffer.split_to(content_length).to_vec())
}
