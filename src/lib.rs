pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod state;

pub use config::Settings;
pub use state::AppState;
