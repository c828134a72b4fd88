use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fossil: FossilConfig,
}

/// Where and how the websocket server listens.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The interface to bind, e.g. "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// The port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// The frontend origin allowed to connect. Unset means any origin,
    /// which is only appropriate for local development.
    #[serde(default)]
    pub app_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            app_url: None,
        }
    }
}

/// Connection settings for the indexer's Postgres database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Settings for the Fossil pricing API.
#[derive(Debug, Clone, Deserialize)]
pub struct FossilConfig {
    pub api_url: String,
    pub api_key: String,
    /// Seconds between status polls of an outstanding pricing job.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    10
}
