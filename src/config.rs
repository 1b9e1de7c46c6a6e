//! Pipeline configuration read from `FORMLINGO_*` environment variables.
//! Malformed values are logged and replaced by their defaults so a typo in
//! the environment never takes translation down.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub const ENV_PREFIX: &str = "FORMLINGO_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown Unicode script for source detection: {0}")]
    InvalidScript(String),
    #[error("backend URL must start with http:// or https://: {0}")]
    InvalidBackendUrl(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateConfig {
    /// Kill switch; when off every field passes through untouched.
    pub translation_enabled: bool,
    pub max_concurrency: usize,
    pub per_call_timeout: Duration,
    pub global_budget: Duration,
    pub gate_acquire_timeout: Duration,
    /// Per-field cap in characters.
    pub max_chars: usize,
    pub cache_max_entries: usize,
    pub cache_max_bytes: usize,
    /// `None` disables age-based expiry.
    pub cache_ttl: Option<Duration>,
    /// Unicode script whose presence marks text as needing translation.
    pub source_script: String,
    pub target_lang: String,
    /// Field names that are never translated.
    pub skip_fields: Vec<String>,
    pub backend_url: Option<String>,
    #[serde(skip_serializing)]
    pub backend_api_key: Option<String>,
}

const DEFAULT_TIMEOUT_SECS: f64 = 2.0;
const DEFAULT_CONCURRENCY: usize = 1;
const MIN_GLOBAL_BUDGET_SECS: f64 = 0.2;

/// `max(0.2s, per_call_timeout * max_concurrency)`, saturating at
/// `Duration::MAX`.
pub fn derived_global_budget(per_call_timeout: Duration, max_concurrency: usize) -> Duration {
    let secs = per_call_timeout.as_secs_f64() * max_concurrency.max(1) as f64;
    Duration::try_from_secs_f64(secs.max(MIN_GLOBAL_BUDGET_SECS)).unwrap_or(Duration::MAX)
}

impl Default for TranslateConfig {
    fn default() -> Self {
        let per_call_timeout = Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS);
        Self {
            translation_enabled: true,
            max_concurrency: DEFAULT_CONCURRENCY,
            per_call_timeout,
            global_budget: derived_global_budget(per_call_timeout, DEFAULT_CONCURRENCY),
            gate_acquire_timeout: Duration::from_millis(100),
            max_chars: 4000,
            cache_max_entries: 256,
            cache_max_bytes: 2_000_000,
            cache_ttl: Some(Duration::from_secs(3600)),
            source_script: "Cyrillic".into(),
            target_lang: "en".into(),
            skip_fields: vec!["text".into(), "text_content".into()],
            backend_url: None,
            backend_api_key: None,
        }
    }
}

impl TranslateConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. `lookup` receives full
    /// variable names including [`ENV_PREFIX`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (format!("{ENV_PREFIX}{suffix}"), v))
        };
        let defaults = Self::default();

        let translation_enabled =
            parse_or(get("TRANSLATION_ENABLED"), defaults.translation_enabled, parse_bool);
        let max_concurrency =
            parse_or(get("MAX_CONCURRENCY"), defaults.max_concurrency, parse_usize).max(1);
        let per_call_timeout =
            parse_or(get("TRANSLATE_TIMEOUT_SEC"), defaults.per_call_timeout, parse_secs);
        let global_budget = parse_or(
            get("GLOBAL_BUDGET_SEC"),
            derived_global_budget(per_call_timeout, max_concurrency),
            parse_secs,
        );
        let gate_acquire_timeout =
            parse_or(get("ACQUIRE_TIMEOUT_SEC"), defaults.gate_acquire_timeout, parse_secs);
        let max_chars = parse_or(get("MAX_CHARS"), defaults.max_chars, parse_usize);
        let cache_max_entries =
            parse_or(get("CACHE_MAX_ENTRIES"), defaults.cache_max_entries, parse_usize).max(1);
        let cache_max_bytes = parse_or(get("CACHE_MAX_BYTES"), defaults.cache_max_bytes, parse_usize);
        let cache_ttl = parse_or(
            get("CACHE_TTL_SEC"),
            defaults.cache_ttl.unwrap_or_default(),
            parse_secs,
        );
        let skip_fields = get("SKIP_FIELDS")
            .map(|(_, v)| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.skip_fields);

        Self {
            translation_enabled,
            max_concurrency,
            per_call_timeout,
            global_budget,
            gate_acquire_timeout,
            max_chars,
            cache_max_entries,
            cache_max_bytes,
            cache_ttl: Some(cache_ttl).filter(|t| !t.is_zero()),
            source_script: get("SOURCE_SCRIPT").map(|(_, v)| v).unwrap_or(defaults.source_script),
            target_lang: get("TARGET_LANG").map(|(_, v)| v).unwrap_or(defaults.target_lang),
            skip_fields,
            backend_url: get("TRANSLATE_URL").map(|(_, v)| v),
            backend_api_key: get("TRANSLATE_API_KEY").map(|(_, v)| v),
        }
    }

    /// Checks that cannot be repaired by falling back to a default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if regex::Regex::new(&format!(r"\p{{{}}}", self.source_script)).is_err() {
            return Err(ConfigError::InvalidScript(self.source_script.clone()));
        }
        if let Some(url) = &self.backend_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidBackendUrl(url.clone()));
            }
        }
        Ok(())
    }

    pub fn is_skipped_field(&self, name: &str) -> bool {
        self.skip_fields.iter().any(|f| f == name)
    }
}

fn parse_or<T, P>(entry: Option<(String, String)>, default: T, parse: P) -> T
where
    P: Fn(&str) -> Option<T>,
{
    match entry {
        None => default,
        Some((name, raw)) => parse(&raw).unwrap_or_else(|| {
            warn!(var = %name, value = %raw, "invalid config value, using default");
            default
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_usize(raw: &str) -> Option<usize> {
    raw.parse().ok()
}

/// Non-negative seconds that fit in a `Duration`; NaN, infinities and
/// out-of-range values are rejected.
fn parse_secs(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
