//! Web interface: router, handlers and HTML templates.

pub mod server;
pub mod templates;

pub use server::{AppState, ServerHandle, build_router, start_server};
