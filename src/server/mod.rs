pub mod config;
pub mod metrics;
mod requests_logging;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use requests_logging::{log_requests, RequestsLoggingLevel};
#[allow(unused_imports)] // Used by main.rs
pub use server::run_server;
