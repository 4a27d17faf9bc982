pub mod auth;
pub mod clock;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod keygen;
pub mod registry;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: registry::Registry,
    /// Bearer token guarding the /admin routes.
    pub admin_key: String,
}

pub use server::{router, run, ServerConfig};
