//! Transport layer: how payloads reach the target

pub mod client;
pub mod transport;
pub use client::HttpTransport;
pub use transport::{KeywordListTransport, Transport, TransportError, TransportResponse};
