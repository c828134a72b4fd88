use crate::error::ConfigError;
use crate::settings::Config;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{DatabaseConfig, FossilConfig, ServerConfig};

/// Loads the application configuration.
///
/// An optional `config.toml` provides the base; the well-known environment
/// variables the deployment has always used (`DATABASE_URL`, `APP_URL`,
/// `FOSSIL_API_URL`, `FOSSIL_API_KEY`) override it.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::default().separator("__"))
        .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
        .set_override_option("server.app_url", std::env::var("APP_URL").ok())?
        .set_override_option("fossil.api_url", std::env::var("FOSSIL_API_URL").ok())?
        .set_override_option("fossil.api_key", std::env::var("FOSSIL_API_KEY").ok())?
        .build()?;

    let config = builder.try_deserialize::<Config>()?;

    Ok(config)
}
