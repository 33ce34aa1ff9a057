//! Application assembly: configuration, loading and wiring

pub mod config;
pub mod loader;
pub mod wiring;

pub use config::AppConfig;
pub use loader::load_config;
pub use wiring::{attach, build, App};
