pub mod env;
mod loader;

pub use env::{AppConfig, CaptureConfig, DirectoryConfig, GeminiConfig, MapConfig};
pub use loader::load_config;
