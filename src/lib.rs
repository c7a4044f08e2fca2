pub mod commands;
pub mod config;
pub mod devices;
pub mod docs;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod serial;
pub mod speech;
pub mod utils;

pub use error::AppError;
pub use models::AppState;
pub use routes::create_router;
