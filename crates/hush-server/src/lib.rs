pub mod crypto;
pub mod error;
pub mod handlers;
pub mod keygen;
pub mod lifecycle;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: lifecycle::LifecycleManager,
}

pub use error::{Error, Result};
pub use lifecycle::{
    CreateRequest, CreateResponse, LifecycleManager, PasswordResponse, RevealRequest,
    RevealResponse,
};
pub use server::{resolve_data_dir, run, ServerConfig, StorageBackend};
