use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the SQLite store inside `data_dir`
pub const DATABASE_FILE: &str = "caddyproxymanager.db";

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub caddy: CaddyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Admin API port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the database (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Token accepted at login and as a bearer token.
    /// If not set, a random token is generated at startup and logged
    pub admin_token: Option<String>,

    /// JWT signing secret. Random per process if not set
    pub jwt_secret: Option<String>,

    /// Lifetime of issued JWTs (default: 24)
    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: i64,

    /// Push the stored hosts to Caddy at startup (default: true)
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
            data_dir: default_data_dir(),
            admin_token: None,
            jwt_secret: None,
            token_expiry_hours: default_token_expiry_hours(),
            sync_on_startup: true,
        }
    }
}

impl ServerConfig {
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(DATABASE_FILE)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaddyConfig {
    /// Caddy admin endpoint (default: http://localhost:2019)
    #[serde(default = "default_caddy_admin_url")]
    pub admin_url: String,
}

impl Default for CaddyConfig {
    fn default() -> Self {
        Self {
            admin_url: default_caddy_admin_url(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_token_expiry_hours() -> i64 {
    24
}

fn default_true() -> bool {
    true
}

fn default_caddy_admin_url() -> String {
    "http://localhost:2019".to_string()
}

impl Config {
    /// Load from a TOML file (defaults if it does not exist), then apply
    /// environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `get`
    pub fn load_with_env<P, F>(path: P, get: F) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_overrides(get)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply SERVER_PORT, DATA_PATH, CADDY_ADMIN_URL, JWT_SECRET and ADMIN_TOKEN
    pub fn apply_overrides<F>(&mut self, get: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = get("SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid SERVER_PORT '{}': {}", port, e))?;
        }
        if let Some(data_dir) = get("DATA_PATH") {
            self.server.data_dir = data_dir;
        }
        if let Some(url) = get("CADDY_ADMIN_URL") {
            self.caddy.admin_url = url;
        }
        if let Some(secret) = get("JWT_SECRET") {
            self.server.jwt_secret = Some(secret);
        }
        if let Some(token) = get("ADMIN_TOKEN") {
            self.server.admin_token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.caddy.admin_url.trim().is_empty() {
            errors.push("caddy.admin_url must not be empty".to_string());
        }
        if self.server.token_expiry_hours <= 0 {
            errors.push("server.token_expiry_hours must be positive".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
