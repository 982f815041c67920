//! Application configuration loaded from environment variables.
//!
//! All optional: `HTTP_BIND`, `HTTP_PORT`, `STRIPE_API_BASE`,
//! `STRIPE_TIMEOUT_SECS`, `IDENTITY_HEADER`, `CATALOG_PATH`, `STATE_PATH`,
//! `RECONCILE_INTERVAL_SECS`, `RECONCILE_CONCURRENCY`, `ENFORCE_CATALOG_PRICE`
//!
//! The processor secret key is deliberately absent: it is only ever set by an
//! admin through the API.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::identity::DEFAULT_IDENTITY_HEADER;

/// Application configuration for the order/payment backend.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub http_bind: String,
    /// HTTP server port.
    pub http_port: u16,
    /// Base URL of the payment processor API.
    pub stripe_api_base: String,
    /// Upper bound on any single processor call.
    pub stripe_timeout: Duration,
    /// Request header carrying the platform-authenticated caller identity.
    pub identity_header: String,
    /// JSON rank list replacing the built-in catalog.
    pub catalog_path: Option<PathBuf>,
    /// Snapshot file for the service tables; in-memory only when unset.
    pub state_path: Option<PathBuf>,
    /// Period of the background reconciler; `None` disables it.
    pub reconcile_interval: Option<Duration>,
    /// Maximum concurrent processor lookups during a reconcile pass.
    pub reconcile_concurrency: usize,
    /// Reject orders whose price or rank disagrees with the catalog.
    pub enforce_catalog_price: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_bind: "0.0.0.0".into(),
            http_port: 8080,
            stripe_api_base: "https://api.stripe.com".into(),
            stripe_timeout: Duration::from_secs(15),
            identity_header: DEFAULT_IDENTITY_HEADER.into(),
            catalog_path: None,
            state_path: None,
            reconcile_interval: Some(Duration::from_secs(60)),
            reconcile_concurrency: 4,
            enforce_catalog_price: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let http_bind = std::env::var("HTTP_BIND").unwrap_or(defaults.http_bind);
        let http_port = parse_var("HTTP_PORT")?.unwrap_or(defaults.http_port);

        let stripe_api_base =
            std::env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base);
        let stripe_timeout = parse_var::<u64>("STRIPE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.stripe_timeout);
        anyhow::ensure!(!stripe_timeout.is_zero(), "STRIPE_TIMEOUT_SECS must be positive");

        let identity_header = std::env::var("IDENTITY_HEADER")
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or(defaults.identity_header);

        let catalog_path = path_var("CATALOG_PATH");
        let state_path = path_var("STATE_PATH");

        let reconcile_interval = match parse_var::<u64>("RECONCILE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.reconcile_interval,
        };

        let reconcile_concurrency = parse_var("RECONCILE_CONCURRENCY")?
            .unwrap_or(defaults.reconcile_concurrency)
            .max(1);

        let enforce_catalog_price =
            parse_var("ENFORCE_CATALOG_PRICE")?.unwrap_or(defaults.enforce_catalog_price);

        Ok(Self {
            http_bind,
            http_port,
            stripe_api_base,
            stripe_timeout,
            identity_header,
            catalog_path,
            state_path,
            reconcile_interval,
            reconcile_concurrency,
            enforce_catalog_price,
        })
    }
}

/// Parse an optional variable, failing loudly on a malformed value.
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(None),
    }
}

/// Read an optional path variable with `~` expanded.
fn path_var(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| PathBuf::from(shellexpand::tilde(v.trim()).to_string()))
}
