//! Unified error type.

use std::net::AddrParseError;

use thiserror::Error;

/// The error type returned by httpmetrics' fallible operations.
///
/// Application-level errors (404, 422, etc.) are written to the
/// [`ResponseWriter`](crate::ResponseWriter) by handlers, not returned as
/// `Error`s. Capture never fails either. This type surfaces transport
/// failures: parsing the bind address, binding the port or accepting a
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid socket address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
