//! Configuration management for the OA server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with OA_ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT session configuration
    pub jwt: JwtConfig,

    /// One-time password configuration
    pub totp: TotpConfig,

    /// Attendance punch rules
    pub attendance: AttendanceConfig,

    /// File storage
    pub storage: StorageConfig,

    /// Expense proration defaults
    pub expense: ExpenseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens
    pub secret: String,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,

    /// How long after expiry a token may still be exchanged, in seconds
    pub refresh_leeway: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TotpConfig {
    /// Issuer shown in authenticator apps
    pub issuer: String,

    /// Time step in seconds
    pub period: u64,

    /// Code length
    pub digits: u32,

    /// Accepted clock drift in time steps on either side
    pub skew: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttendanceConfig {
    /// Offset of company local time from UTC, used to classify punches
    pub utc_offset_hours: i32,

    /// Reject punches from outside the private network
    pub require_inner_network: bool,

    /// Kernel ARP table used to resolve client MAC addresses
    pub arp_table_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for uploads and display files
    pub assets_dir: PathBuf,

    /// Upper bound for a single request body
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpenseConfig {
    /// Revenue target assumed for years without one
    pub default_annual_target: Decimal,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("OA_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 5000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("jwt.access_token_expiry", 7200)?
            .set_default("jwt.refresh_leeway", 300)?
            .set_default("totp.issuer", "FactoryOA")?
            .set_default("totp.period", 30)?
            .set_default("totp.digits", 6)?
            .set_default("totp.skew", 1)?
            .set_default("attendance.utc_offset_hours", 8)?
            .set_default("attendance.require_inner_network", true)?
            .set_default("attendance.arp_table_path", "/proc/net/arp")?
            .set_default("storage.assets_dir", "assets")?
            .set_default("storage.max_upload_bytes", 50 * 1024 * 1024)?
            .set_default("expense.default_annual_target", "10000000.00")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (OA_ prefix)
            .add_source(
                Environment::with_prefix("OA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
        }
    }
}
