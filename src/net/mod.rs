//! Request/response model and the outbound transport.

#[cfg(test)]
pub mod fake;
mod transport;
mod types;

pub use transport::{is_hop_by_hop, HttpTransport, Transport};
pub use types::{Method, Request, Response, ResponseSource, OUTCOME_HEADER, SOURCE_HEADER};
