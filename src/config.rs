use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Digital newspaper publishing backend.
#[derive(Parser, Debug, Clone)]
#[command(name = "epaper-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "EPAPER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Site settings commands.
    Settings {
        /// Settings subcommand action.
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin, publisher or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Settings subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Read a setting value.
    Get {
        /// Setting key (e.g. subscription_mode_enabled).
        key: String,
    },

    /// Write a setting value.
    Set {
        /// Setting key.
        key: String,
        /// Setting value.
        value: String,
    },

    /// List all settings.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Artifact storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Site title.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "My Newspaper".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/epaper.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for uploaded and derived files.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/uploads")
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of parallel workers for image decoding/encoding (1 = sequential).
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_ingest_workers(),
        }
    }
}

fn default_ingest_workers() -> usize {
    1
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("epaper-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("epaper-rs").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/epaper-rs/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# epaper-rs configuration

[server]
bind = "0.0.0.0:8080"
title = "My Newspaper"

[database]
# path = "/var/lib/epaper-rs/epaper.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30

[storage]
# Root directory for uploaded sources, page images, thumbnails and crops
# root = "/var/lib/epaper-rs/uploads"

[ingest]
# Parallel workers for image decoding/encoding (1 = sequential)
workers = 1
"#
        .to_string()
    }
}

/// Edition lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditionStatus {
    /// Not yet visible; being prepared.
    Draft,
    /// Visible in the live rotation.
    Live,
    /// Published with a publish date.
    Published,
    /// Retired from circulation.
    Archived,
}

impl EditionStatus {
    /// Database/API string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionStatus::Draft => "draft",
            EditionStatus::Live => "live",
            EditionStatus::Published => "published",
            EditionStatus::Archived => "archived",
        }
    }

    /// Parse a status string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(EditionStatus::Draft),
            "live" => Some(EditionStatus::Live),
            "published" => Some(EditionStatus::Published),
            "archived" => Some(EditionStatus::Archived),
            _ => None,
        }
    }
}
