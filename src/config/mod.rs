//! Configuration for the mirror service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Remote Firestore collection to mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    /// REST root, e.g. `https://firestore.googleapis.com/v1` or an emulator
    pub base_url: String,
    pub project_id: String,
    pub collection: String,
    /// Bearer token for the REST API, if the collection is not public
    pub token: Option<String>,
    pub poll_interval: Duration,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite mirror database
    pub db_path: PathBuf,
    /// Address to bind the read API to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human readable format
    pub log_json: bool,
    /// Remote collection; `None` serves the last mirrored data only
    pub firestore: Option<FirestoreConfig>,
    /// First resubscribe delay after a subscription error
    pub retry_initial: Duration,
    /// Upper bound for the resubscribe delay
    pub retry_max: Duration,
    /// How long `GET /api/requests/changes` waits for a new revision
    pub changes_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an explicit key/value map.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, AppError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let db_path = lookup("BLOODCONNECT_DB_PATH")
            .unwrap_or_else(|| "./data/bloodconnect.sqlite".to_string())
            .into();

        let bind_addr = parse_or(&lookup, "BLOODCONNECT_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = lookup("BLOODCONNECT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_json = match lookup("BLOODCONNECT_LOG_FORMAT").as_deref() {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "Invalid BLOODCONNECT_LOG_FORMAT value {:?}: expected text or json",
                    other
                )))
            }
        };

        let firestore = match lookup("BLOODCONNECT_FIRESTORE_PROJECT") {
            Some(project_id) if !project_id.trim().is_empty() => {
                let poll_secs: u64 = parse_or(&lookup, "BLOODCONNECT_POLL_INTERVAL_SECS", "15")?;
                if poll_secs == 0 {
                    return Err(AppError::Config(
                        "BLOODCONNECT_POLL_INTERVAL_SECS must be greater than zero".to_string(),
                    ));
                }

                Some(FirestoreConfig {
                    base_url: lookup("BLOODCONNECT_FIRESTORE_BASE_URL")
                        .unwrap_or_else(|| "https://firestore.googleapis.com/v1".to_string()),
                    project_id,
                    collection: lookup("BLOODCONNECT_FIRESTORE_COLLECTION")
                        .unwrap_or_else(|| "blood_requests".to_string()),
                    token: lookup("BLOODCONNECT_FIRESTORE_TOKEN"),
                    poll_interval: Duration::from_secs(poll_secs),
                })
            }
            _ => None,
        };

        let retry_initial =
            Duration::from_millis(parse_or(&lookup, "BLOODCONNECT_RETRY_INITIAL_MS", "500")?);
        let retry_max =
            Duration::from_millis(parse_or(&lookup, "BLOODCONNECT_RETRY_MAX_MS", "30000")?);
        if retry_max < retry_initial {
            return Err(AppError::Config(
                "BLOODCONNECT_RETRY_MAX_MS must not be smaller than BLOODCONNECT_RETRY_INITIAL_MS"
                    .to_string(),
            ));
        }

        let changes_timeout = Duration::from_secs(parse_or(
            &lookup,
            "BLOODCONNECT_CHANGES_TIMEOUT_SECS",
            "30",
        )?);

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            log_json,
            firestore,
            retry_initial,
            retry_max,
            changes_timeout,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {} value {:?}: {}", key, raw, e)))
}
