//! Utilities
//!
//! Blocking HTTP with the `{code, message, data}` envelope, hashing helpers
//! and the redacting logger behind `log_*!`.

mod http;
pub mod crypto;
pub mod logging;

pub use crypto::*;
pub use http::*;
