//! Configuration for the session core and its local HTTP facade.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Hosted backend endpoint and public key.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://project.example.co`
    pub url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Where email confirmation links send the user.
    #[serde(default = "default_callback_url")]
    pub email_redirect_url: String,
    /// Where OAuth providers send the user back to.
    #[serde(default = "default_callback_url")]
    pub oauth_redirect_url: String,
    /// Path the callback route navigates to after a successful sign-in.
    #[serde(default = "default_post_login_path")]
    pub post_login_path: String,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// File persisting the session tokens across restarts.
    #[serde(default)]
    pub session_file: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            email_redirect_url: default_callback_url(),
            oauth_redirect_url: default_callback_url(),
            post_login_path: default_post_login_path(),
            min_password_length: default_min_password_length(),
            session_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Tables of the hosted backend.
    Rest,
    /// Local SQLite file.
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_callback_url() -> String {
    format!("http://{}:{}/auth/callback", default_host(), default_port())
}
fn default_post_login_path() -> String {
    "/".to_string()
}
fn default_min_password_length() -> usize {
    6
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Rest
}
fn default_database_url() -> String {
    "sqlite:./data/serene.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (SERENE__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SERENE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
