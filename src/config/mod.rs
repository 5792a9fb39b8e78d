pub mod loader;
pub mod settings;

pub use loader::{load_config, Config, ConfigError};
pub use settings::Settings;
