//! Library exports for reuse in the CLI, benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// HTTP implementation of the backend gateway.
pub mod backend;
/// `config.toml` settings.
pub mod config;
/// Shared HTTP agent and retry helpers.
pub(crate) mod http_client;
/// Tracing subscriber setup.
pub mod logging;
/// Threaded driver feeding backend replies into a session.
pub mod runtime;
/// Labeling session state machine.
pub mod session;
