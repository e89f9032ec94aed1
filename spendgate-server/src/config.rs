//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//!
//! [store]
//! backend = "postgres"
//! database_url = "$DATABASE_URL"
//!
//! [settlement]
//! enabled = true
//! network = "eip155:84532"
//! rpc_url = "https://sepolia.base.org"
//! bundler_url = "$BUNDLER_URL"
//! paymaster_url = "$PAYMASTER_URL"
//! spender_private_key = "$SPENDER_PRIVATE_KEY"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - `DATABASE_URL` - Override `store.database_url`
//! - Secrets referenced by `$VAR` in the config file

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3000`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Record store selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// On-chain settlement.
    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// Which record store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; records are lost on restart.
    #[default]
    Memory,
    /// Postgres via `database_url`.
    Postgres,
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to use (default: `memory`).
    #[serde(default)]
    pub backend: StoreBackend,

    /// Postgres connection string, required for the `postgres` backend.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum pooled connections (default: `10`).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Settlement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Whether collected permissions are approved on-chain (default: `false`).
    #[serde(default)]
    pub enabled: bool,

    /// CAIP-2 network to settle on (default: `eip155:8453`).
    #[serde(default = "default_network")]
    pub network: String,

    /// HTTP RPC endpoint URL of the chain.
    #[serde(default)]
    pub rpc_url: String,

    /// ERC-4337 bundler endpoint URL.
    #[serde(default)]
    pub bundler_url: String,

    /// ERC-7677 paymaster endpoint URL; gas is self-funded when unset.
    #[serde(default)]
    pub paymaster_url: Option<String>,

    /// Private key owning the spender smart account (hex, with or without `0x`).
    /// Supports `$VAR` / `${VAR}` for environment variable expansion.
    #[serde(default)]
    pub spender_private_key: String,

    /// Upper bound on waiting for a user operation receipt (default: `60`).
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,

    /// Delay between receipt polls in milliseconds (default: `2000`).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-request timeout for bundler and paymaster calls (default: `30`).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            network: default_network(),
            rpc_url: String::new(),
            bundler_url: String::new(),
            paymaster_url: None,
            spender_private_key: String::new(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SettlementConfig {
    /// Bound on receipt polling.
    #[must_use]
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// Delay between receipt polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on each bundler or paymaster request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    10
}

fn default_network() -> String {
    "eip155:8453".to_owned()
}

const fn default_receipt_timeout_secs() -> u64 {
    60
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST`, `PORT` and
    /// `DATABASE_URL` env vars override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            // No config file: run on defaults
            String::new()
        };

        let mut config = Self::parse(&content)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.store.database_url = Some(url);
            }
        }

        Ok(config)
    }

    /// Parses TOML content after expanding environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid configuration TOML.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(&expand_env_vars(content))
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Some(val) = lookup(&var_name) {
            result.push_str(&val);
        } else {
            // Leave unresolved variable as-is
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "KEY" => Some("0xabc".to_owned()),
            "BUNDLER_URL" => Some("https://bundler.example".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_expands_plain_and_braced_variables() {
        assert_eq!(expand_with("key = \"$KEY\"", lookup), "key = \"0xabc\"");
        assert_eq!(
            expand_with("url = \"${BUNDLER_URL}/rpc\"", lookup),
            "url = \"https://bundler.example/rpc\""
        );
    }

    #[test]
    fn test_leaves_unresolved_variables() {
        assert_eq!(expand_with("$MISSING and ${ALSO}", lookup), "$MISSING and ${ALSO}");
        assert_eq!(expand_with("cost: $5", lookup), "cost: $5");
        assert_eq!(expand_with("trailing $", lookup), "trailing $");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.max_connections, 10);
        assert!(!config.settlement.enabled);
        assert_eq!(config.settlement.network, "eip155:8453");
        assert_eq!(config.settlement.receipt_timeout(), Duration::from_secs(60));
        assert_eq!(config.settlement.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.settlement.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parses_full_config() {
        let config = AppConfig::parse(
            r#"
            host = "127.0.0.1"
            port = 8080

            [store]
            backend = "postgres"
            database_url = "postgres://localhost/spendgate"
            max_connections = 4

            [settlement]
            enabled = true
            network = "eip155:84532"
            rpc_url = "https://sepolia.base.org"
            bundler_url = "https://bundler.example"
            spender_private_key = "0x01"
            receipt_timeout_secs = 30
            poll_interval_ms = 500
            request_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(
            config.store.database_url.as_deref(),
            Some("postgres://localhost/spendgate")
        );
        assert!(config.settlement.enabled);
        assert!(config.settlement.paymaster_url.is_none());
        assert_eq!(config.settlement.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.settlement.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_store_table_without_pool_size_keeps_default() {
        let config = AppConfig::parse("[store]\nbackend = \"postgres\"").unwrap();
        assert_eq!(config.store.max_connections, 10);
        assert_eq!(StoreConfig::default().max_connections, 10);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(AppConfig::parse("[store]\nbackend = \"redis\"").is_err());
    }
}
