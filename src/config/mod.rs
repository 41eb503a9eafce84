pub mod settings;

use tracing::info;

pub use settings::AppSettings;

/// Initialize application configuration from environment variables.
pub fn init_config() -> Result<AppSettings, Box<dyn std::error::Error>> {
    info!("Initializing application configuration from environment");
    let config = AppSettings::from_env()?;
    Ok(config)
}
