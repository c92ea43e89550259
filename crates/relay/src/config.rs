// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Coordination tuning (lock TTLs, staleness thresholds) lives in
// the coord TOML file this module points at.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use teamgraph_coord::config::CoordConfig;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string for the graph store. Unset means the
    /// in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `teamgraph_coord=debug`).
    pub log_filter: String,
    /// Explicit coord config file. Unset means `~/.teamgraph/coord.toml`.
    pub coord_config_path: Option<PathBuf>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TEAMGRAPH_RELAY_HOST` | `0.0.0.0` |
    /// | `TEAMGRAPH_RELAY_PORT` | `8080` |
    /// | `TEAMGRAPH_RELAY_DATABASE_URL` | *(none: in-memory graph store)* |
    /// | `TEAMGRAPH_RELAY_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `TEAMGRAPH_RELAY_LOG_FILTER` | `info` |
    /// | `TEAMGRAPH_RELAY_COORD_CONFIG` | `~/.teamgraph/coord.toml` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TEAMGRAPH_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("TEAMGRAPH_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("TEAMGRAPH_RELAY_DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let cors_origins = env("TEAMGRAPH_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("TEAMGRAPH_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let coord_config_path = env("TEAMGRAPH_RELAY_COORD_CONFIG").ok().map(PathBuf::from);

        Self { listen_addr, database_url, cors_origins, log_filter, coord_config_path }
    }

    /// Load the coordination config this relay should run with.
    pub fn load_coord_config(&self) -> Result<CoordConfig> {
        match &self.coord_config_path {
            Some(path) => CoordConfig::load_from(path)
                .with_context(|| format!("failed to load coord config from {}", path.display())),
            None => CoordConfig::load().context("failed to load default coord config"),
        }
    }
}
