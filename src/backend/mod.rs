//! Learning backend reached over HTTP.

mod wire;

pub mod api;

pub use api::HttpBackend;
