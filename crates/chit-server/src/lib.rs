pub mod handlers;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
}

pub use server::{router, run, ServerConfig};
