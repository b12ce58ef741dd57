//! Runtime settings, read from the environment (after `.env` is loaded).
//!
//! `EXPENSEPRO_*` variables take precedence; the backend URL and anon key
//! fall back to the `SUPABASE_*` names the web app's build uses.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::connectivity::PROBE_INTERVAL;
use crate::sync::coordinator::DEFAULT_MAX_REJECTIONS;
use crate::sync::storage::DEFAULT_QUOTA_BYTES;

const DEFAULT_API_URL: &str = "http://localhost:54321";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("no local data directory available; set EXPENSEPRO_QUEUE_DIR")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Backend base URL (REST at `/rest/v1`, auth at `/auth/v1`).
    pub api_url: String,
    /// Project API key sent as the `apikey` header.
    pub api_key: Option<String>,
    /// Session access token (JWT) of the signed-in user.
    pub access_token: Option<String>,
    /// Directory holding the queue files.
    pub queue_dir: PathBuf,
    pub probe_interval: Duration,
    pub max_rejections: u32,
    /// Byte budget for the serialized queue. `None` disables the check.
    pub queue_max_bytes: Option<usize>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_url = var("EXPENSEPRO_API_URL")
            .or_else(|| var("SUPABASE_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = var("EXPENSEPRO_API_KEY").or_else(|| var("SUPABASE_ANON_KEY"));
        let access_token = var("EXPENSEPRO_ACCESS_TOKEN");

        let queue_dir = match var("EXPENSEPRO_QUEUE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("expensepro"),
        };

        let number = |name: &'static str| parse_number(name, var(name));

        let probe_interval = match number("EXPENSEPRO_PROBE_INTERVAL_SECS")? {
            Some(0) | None => PROBE_INTERVAL,
            Some(secs) => Duration::from_secs(secs),
        };

        let max_rejections = number("EXPENSEPRO_MAX_REJECTIONS")?
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_MAX_REJECTIONS);

        // 0 means unlimited
        let queue_max_bytes = match number("EXPENSEPRO_QUEUE_MAX_BYTES")? {
            Some(0) => None,
            Some(bytes) => Some(bytes as usize),
            None => Some(DEFAULT_QUOTA_BYTES),
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
            queue_dir,
            probe_interval,
            max_rejections,
            queue_max_bytes,
        })
    }
}

fn parse_number(name: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                name,
                value: v.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("EXPENSEPRO_QUEUE_DIR", "/tmp/q")]).unwrap();
        assert_eq!(s.api_url, DEFAULT_API_URL);
        assert_eq!(s.api_key, None);
        assert_eq!(s.access_token, None);
        assert_eq!(s.queue_dir, PathBuf::from("/tmp/q"));
        assert_eq!(s.probe_interval, PROBE_INTERVAL);
        assert_eq!(s.max_rejections, DEFAULT_MAX_REJECTIONS);
        assert_eq!(s.queue_max_bytes, Some(DEFAULT_QUOTA_BYTES));
    }

    #[test]
    fn test_supabase_names_are_fallbacks() {
        let s = settings(&[
            ("EXPENSEPRO_QUEUE_DIR", "/tmp/q"),
            ("SUPABASE_URL", "https://project.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
        ])
        .unwrap();
        assert_eq!(s.api_url, "https://project.supabase.co");
        assert_eq!(s.api_key.as_deref(), Some("anon"));

        let s = settings(&[
            ("EXPENSEPRO_QUEUE_DIR", "/tmp/q"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("EXPENSEPRO_API_URL", "http://127.0.0.1:8000"),
            ("EXPENSEPRO_API_KEY", "own-key"),
            ("SUPABASE_ANON_KEY", "anon"),
        ])
        .unwrap();
        assert_eq!(s.api_url, "http://127.0.0.1:8000");
        assert_eq!(s.api_key.as_deref(), Some("own-key"));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let s = settings(&[
            ("EXPENSEPRO_QUEUE_DIR", "/tmp/q"),
            ("EXPENSEPRO_API_URL", ""),
            ("EXPENSEPRO_ACCESS_TOKEN", "  "),
            ("EXPENSEPRO_MAX_REJECTIONS", ""),
        ])
        .unwrap();
        assert_eq!(s.api_url, DEFAULT_API_URL);
        assert_eq!(s.access_token, None);
        assert_eq!(s.max_rejections, DEFAULT_MAX_REJECTIONS);
    }

    #[test]
    fn test_numeric_overrides() {
        let s = settings(&[
            ("EXPENSEPRO_QUEUE_DIR", "/tmp/q"),
            ("EXPENSEPRO_PROBE_INTERVAL_SECS", "5"),
            ("EXPENSEPRO_MAX_REJECTIONS", "0"),
            ("EXPENSEPRO_QUEUE_MAX_BYTES", "0"),
        ])
        .unwrap();
        assert_eq!(s.probe_interval, Duration::from_secs(5));
        assert_eq!(s.max_rejections, 1);
        assert_eq!(s.queue_max_bytes, None);
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = settings(&[
            ("EXPENSEPRO_QUEUE_DIR", "/tmp/q"),
            ("EXPENSEPRO_PROBE_INTERVAL_SECS", "soon"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: "EXPENSEPRO_PROBE_INTERVAL_SECS",
                value: "soon".to_string(),
            }
        );
    }
}
