//! Process configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts against a local
//! PostgreSQL without any environment at all. Values that fail to parse fall
//! back to the default rather than aborting startup.

use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::path::PathBuf;

/// Hard upper bound on bind parameters in a single PostgreSQL statement.
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;

/// Parameter budget used when none is configured.
pub const DEFAULT_MAX_BIND_PARAMS: usize = 2_100;

/// Width of the text columns created for imported files.
pub const DEFAULT_COLUMN_WIDTH: u32 = 255;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Connection parameters for the destination database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Require an encrypted connection.
    pub encrypt: bool,
    /// Accept the server certificate without verifying it.
    pub trust_server_certificate: bool,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string("DB_HOST", "localhost"),
            port: env_u16("DB_PORT", 5432),
            user: env_string("DB_USER", "postgres"),
            password: env_string("DB_PASSWORD", ""),
            database: env_string("DB_NAME", "test_db"),
            encrypt: env_bool("DB_ENCRYPT", false),
            trust_server_certificate: env_bool("DB_TRUST_SERVER_CERTIFICATE", true),
            max_connections: env_u32("DB_MAX_CONNECTIONS", 5).max(1),
        }
    }

    pub fn ssl_mode(&self) -> PgSslMode {
        ssl_mode_for(self.encrypt, self.trust_server_certificate)
    }

    /// Build driver connection options from this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .ssl_mode(self.ssl_mode())
            .application_name("csv-import-server");

        if !self.password.is_empty() {
            options = options.password(&self.password);
        }

        options.log_statements(LevelFilter::Trace)
    }
}

/// Map the encrypt/trust switches onto a PostgreSQL SSL mode.
pub fn ssl_mode_for(encrypt: bool, trust_server_certificate: bool) -> PgSslMode {
    match (encrypt, trust_server_certificate) {
        (false, _) => PgSslMode::Prefer,
        (true, true) => PgSslMode::Require,
        (true, false) => PgSslMode::VerifyFull,
    }
}

/// Tuning knobs for the CSV import pipeline.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Maximum bound parameters per insert statement.
    pub max_bind_params: usize,
    /// `VARCHAR` width of created columns.
    pub column_width: u32,
    /// Rows the reader may parse ahead of the inserter.
    pub channel_capacity: usize,
    /// Fail at provisioning when an existing table lacks the file's columns.
    pub verify_existing_schema: bool,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            max_bind_params: env_usize("IMPORT_MAX_BIND_PARAMS", DEFAULT_MAX_BIND_PARAMS)
                .clamp(1, POSTGRES_MAX_BIND_PARAMS),
            column_width: env_u32("IMPORT_COLUMN_WIDTH", DEFAULT_COLUMN_WIDTH).max(1),
            channel_capacity: env_usize("IMPORT_CHANNEL_CAPACITY", 1024).max(1),
            verify_existing_schema: env_bool("IMPORT_VERIFY_EXISTING_SCHEMA", false),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_bind_params: DEFAULT_MAX_BIND_PARAMS,
            column_width: DEFAULT_COLUMN_WIDTH,
            channel_capacity: 1024,
            verify_existing_schema: false,
        }
    }
}

/// Settings for the HTTP upload surface.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    pub max_files: usize,
    pub max_bytes: u64,
    pub static_dir: PathBuf,
    pub cors_allowed_origin: String,
}

impl UploadConfig {
    pub fn from_env() -> Self {
        Self {
            upload_dir: PathBuf::from(env_string("UPLOAD_DIR", "./uploads")),
            max_files: env_usize("UPLOAD_MAX_FILES", 10).max(1),
            max_bytes: env::var("UPLOAD_MAX_BYTES")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(256 * 1024 * 1024),
            static_dir: PathBuf::from(env_string("STATIC_DIR", "./frontend")),
            cors_allowed_origin: env_string("CORS_ALLOWED_ORIGIN", "http://localhost:3000"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            max_files: 10,
            max_bytes: 256 * 1024 * 1024,
            static_dir: PathBuf::from("./frontend"),
            cors_allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// SMTP settings for completion emails. Disabled unless `SMTP_HOST` and
/// `NOTIFY_TO` are both set.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    pub smtp_tls: bool,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        Self {
            smtp_host: env_opt("SMTP_HOST"),
            smtp_port: env_u16("SMTP_PORT", 587),
            smtp_user: env_opt("SMTP_USER"),
            smtp_password: env_opt("SMTP_PASSWORD"),
            smtp_tls: env_bool("SMTP_TLS", true),
            from: env_opt("SMTP_FROM"),
            to: env_opt("NOTIFY_TO"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.smtp_host.is_some() && self.to.is_some()
    }

    /// Sender address, falling back to the SMTP login and then the recipient.
    pub fn sender(&self) -> Option<&str> {
        self.from
            .as_deref()
            .or(self.smtp_user.as_deref())
            .or(self.to.as_deref())
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            smtp_tls: true,
            from: None,
            to: None,
        }
    }
}
