//! Minimal HTTP/1.1 server for device provisioning.
//!
//! One request per connection, no keep-alive, exact (path, method) routing
//! with a captive-portal fallback: unmatched GETs are served by the root
//! handler so OS connectivity-check probes land on the provisioning form.
//! The parser is defensive against hostile or malformed clients; see
//! [`request`].
//!
//! # Components
//!
//! - [`request`] - request parsing and form decoding
//! - [`server`] - routing table and the TCP listener

pub mod request;
pub mod server;

pub use request::{HttpRequest, Method, MAX_CONTENT_LENGTH};
pub use server::{HandlerResult, HttpServer, RouteHandler, Router};
