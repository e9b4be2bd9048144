use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Configuration loaded from environment variables once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub ingress_token: String,
    pub api_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let db_path = std::env::var("DISPATCH_DB_PATH")
            .unwrap_or_else(|_| "./data/dispatch.db".to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let ingress_token = std::env::var("DISPATCH_INGRESS_TOKEN")
            .map_err(|_| anyhow!("DISPATCH_INGRESS_TOKEN is required but not set"))?;

        let api_port = std::env::var("DISPATCH_API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| anyhow!("DISPATCH_API_PORT must be a valid port number"))?;

        Ok(Config { db_path, ingress_token, api_port })
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Config {{\n  db_path: {:?},\n  ingress_token: ***MASKED***,\n  api_port: {},\n}}",
            self.db_path, self.api_port,
        )
    }
}
