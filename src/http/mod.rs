//! HTTP/1.1 protocol handling for the proxy front-end.
//!
//! # Architecture
//!
//! - **`connection`**: per-client state machine; hands each request to the dispatcher
//! - **`parser`**: parses incoming HTTP requests from byte buffers
//! - **`chunked`**: decodes `Transfer-Encoding: chunked` bodies
//! - **`headers`**: ordered, case-insensitive header list
//! - **`request`**: HTTP request representation and helpers (host, upgrade, keep-alive)
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes and writes HTTP responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐   Upgrade request   ┌─────────────┐
//!        │   Processing     │ ──────────────────▶ │  Upgrading  │ → relay until close
//!        └──────┬───────────┘                     └─────────────┘
//!               │ Dispatcher produced a response
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod chunked;
pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
