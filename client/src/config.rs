//! Client Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// What the block-status resolver publishes when the profile query fails
/// before any value has been observed for the signed-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockFailPolicy {
    /// Treat the account as blocked.
    #[default]
    Closed,
    /// Treat the account as not blocked.
    Open,
}

impl FromStr for BlockFailPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            other => bail!("LARDER_BLOCK_FAIL_POLICY must be 'closed' or 'open', got '{other}'"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("LARDER_LOG_FORMAT must be 'pretty' or 'json', got '{other}'"),
        }
    }
}

/// Refresh and failure policy for the role and block-status resolvers.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a block-status answer counts as fresh (default: 5s)
    pub block_stale_after: Duration,
    /// Background block-status poll interval (default: 10s)
    pub block_poll_interval: Duration,
    /// How long a role answer is reused for the same account (default: 60s)
    pub role_stale_after: Duration,
    /// Outcome of an unresolvable block-status query
    pub block_fail_policy: BlockFailPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            block_stale_after: Duration::from_millis(5_000),
            block_poll_interval: Duration::from_millis(10_000),
            role_stale_after: Duration::from_millis(60_000),
            block_fail_policy: BlockFailPolicy::Closed,
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted backend base URL (e.g., "https://xyz.supabase.co")
    pub backend_url: String,

    /// Public anonymous API key sent as the `apikey` header
    pub anon_key: String,

    /// HTTP request timeout (default: 30s)
    pub http_timeout: Duration,

    /// Resolver refresh policy
    pub resolvers: ResolverConfig,

    /// Route unauthenticated visitors are sent to (default: "/")
    pub entry_route: String,

    /// Route blocked or unprivileged accounts are sent to (default: "/dashboard")
    pub dashboard_route: String,

    /// Log output format (default: pretty)
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = ResolverConfig::default();

        let block_fail_policy = match env::var("LARDER_BLOCK_FAIL_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => BlockFailPolicy::default(),
        };
        let log_format = match env::var("LARDER_LOG_FORMAT") {
            Ok(v) => v.parse()?,
            Err(_) => LogFormat::default(),
        };

        let config = Self {
            backend_url: env::var("LARDER_BACKEND_URL")
                .context("LARDER_BACKEND_URL must be set")?
                .trim_end_matches('/')
                .to_string(),
            anon_key: env::var("LARDER_ANON_KEY").context("LARDER_ANON_KEY must be set")?,
            http_timeout: Duration::from_secs(env_parse("LARDER_HTTP_TIMEOUT_SECS").unwrap_or(30)),
            resolvers: ResolverConfig {
                block_stale_after: env_millis("LARDER_BLOCK_STALE_MS")
                    .unwrap_or(defaults.block_stale_after),
                block_poll_interval: env_millis("LARDER_BLOCK_POLL_MS")
                    .unwrap_or(defaults.block_poll_interval),
                role_stale_after: env_millis("LARDER_ROLE_STALE_MS")
                    .unwrap_or(defaults.role_stale_after),
                block_fail_policy,
            },
            entry_route: env::var("LARDER_ENTRY_ROUTE").unwrap_or_else(|_| "/".into()),
            dashboard_route: env::var("LARDER_DASHBOARD_ROUTE")
                .unwrap_or_else(|_| "/dashboard".into()),
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the resolvers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.resolvers.block_poll_interval.is_zero() {
            bail!("LARDER_BLOCK_POLL_MS must be greater than zero");
        }
        if !self.entry_route.starts_with('/') || !self.dashboard_route.starts_with('/') {
            bail!("route settings must be absolute paths");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
