/// OCSP responder library
///
/// RFC 6960 responder for the certificates of one CA: request decoding,
/// status resolution against a revocation store, response signing, the HTTP
/// transport and daemon lifecycle control.

pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod ocsp;
pub mod server;
pub mod store;

pub use config::ResponderConfig;
pub use context::AppContext;
pub use error::{ResponderError, ResponderResult};
pub use ocsp::OcspResponder;
