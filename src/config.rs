//! Application-level configuration loading: lifecycle thresholds, sweep
//! cadence, and per-action rate-limit rules.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MATCHDAY_BACK_CONFIG_PATH";

/// One sliding-window rate-limit rule.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitRule {
    /// Maximum requests allowed inside the window.
    pub max_requests: u32,
    /// Window width in seconds.
    pub window_secs: u64,
}

impl RateLimitRule {
    const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Interval between scheduler passes.
    pub sweep_interval: Duration,
    /// Documents fetched per sweep page.
    pub sweep_page_size: usize,
    /// Pre-start games older than this past their scheduled time are archived.
    pub archive_after: Duration,
    /// In-progress games older than this past their start are auto-completed.
    pub complete_after: Duration,
    /// Lower bound of the reminder window, relative to now.
    pub reminder_lead_min: Duration,
    /// Upper bound of the reminder window, relative to now.
    pub reminder_lead_max: Duration,
    /// Fraction of confirmed participants whose ballots close voting.
    pub voting_turnout_threshold: f64,
    /// Voting closes this long after completion regardless of turnout.
    pub voting_timeout: Duration,
    /// How long processed-event markers are retained.
    pub processed_event_ttl: Duration,
    /// How early the organizer may start a game.
    pub early_start_leeway: Duration,
    /// Per-action rate-limit rules, keyed by action name.
    rate_limits: HashMap<String, RateLimitRule>,
    /// Rule applied to actions with no explicit entry.
    pub default_rate_limit: RateLimitRule,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in
    /// defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Rule for the given action, falling back to the default rule.
    pub fn rate_limit(&self, action: &str) -> RateLimitRule {
        self.rate_limits
            .get(action)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_owned(),
            sweep_interval: Duration::from_secs(10 * 60),
            sweep_page_size: 50,
            archive_after: Duration::from_secs(24 * 3600),
            complete_after: Duration::from_secs(5 * 3600),
            reminder_lead_min: Duration::from_secs(3600),
            reminder_lead_max: Duration::from_secs(2 * 3600),
            voting_turnout_threshold: 0.80,
            voting_timeout: Duration::from_secs(2 * 3600),
            processed_event_ttl: Duration::from_secs(7 * 24 * 3600),
            early_start_leeway: Duration::from_secs(30 * 60),
            rate_limits: default_rate_limits(),
            default_rate_limit: RateLimitRule::new(10, 60),
        }
    }
}

/// JSON representation of the configuration file. Every field is optional;
/// missing entries keep their built-in default.
#[derive(Debug, Deserialize)]
struct RawConfig {
    listen_addr: Option<String>,
    sweep_interval_secs: Option<u64>,
    sweep_page_size: Option<usize>,
    archive_after_secs: Option<u64>,
    complete_after_secs: Option<u64>,
    reminder_lead_min_secs: Option<u64>,
    reminder_lead_max_secs: Option<u64>,
    voting_turnout_threshold: Option<f64>,
    voting_timeout_secs: Option<u64>,
    processed_event_ttl_secs: Option<u64>,
    early_start_leeway_secs: Option<u64>,
    rate_limits: Option<HashMap<String, RateLimitRule>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let secs = Duration::from_secs;
        Self {
            listen_addr: value.listen_addr.unwrap_or(defaults.listen_addr),
            sweep_interval: value
                .sweep_interval_secs
                .map(secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_page_size: value.sweep_page_size.unwrap_or(defaults.sweep_page_size),
            archive_after: value
                .archive_after_secs
                .map(secs)
                .unwrap_or(defaults.archive_after),
            complete_after: value
                .complete_after_secs
                .map(secs)
                .unwrap_or(defaults.complete_after),
            reminder_lead_min: value
                .reminder_lead_min_secs
                .map(secs)
                .unwrap_or(defaults.reminder_lead_min),
            reminder_lead_max: value
                .reminder_lead_max_secs
                .map(secs)
                .unwrap_or(defaults.reminder_lead_max),
            voting_turnout_threshold: value
                .voting_turnout_threshold
                .unwrap_or(defaults.voting_turnout_threshold),
            voting_timeout: value
                .voting_timeout_secs
                .map(secs)
                .unwrap_or(defaults.voting_timeout),
            processed_event_ttl: value
                .processed_event_ttl_secs
                .map(secs)
                .unwrap_or(defaults.processed_event_ttl),
            early_start_leeway: value
                .early_start_leeway_secs
                .map(secs)
                .unwrap_or(defaults.early_start_leeway),
            rate_limits: {
                // Explicit entries override defaults, untouched actions keep
                // theirs.
                let mut rules = default_rate_limits();
                rules.extend(value.rate_limits.unwrap_or_default());
                rules
            },
            default_rate_limit: defaults.default_rate_limit,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in per-action request budgets.
fn default_rate_limits() -> HashMap<String, RateLimitRule> {
    HashMap::from([
        ("joinGame".to_owned(), RateLimitRule::new(10, 60)),
        ("castVote".to_owned(), RateLimitRule::new(10, 60)),
        ("closeVoting".to_owned(), RateLimitRule::new(5, 60)),
        ("rejectPlayer".to_owned(), RateLimitRule::new(10, 60)),
        ("startGame".to_owned(), RateLimitRule::new(3, 60)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"sweep_page_size": 25}"#).expect("valid json");
        let config: AppConfig = raw.into();
        assert_eq!(config.sweep_page_size, 25);
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.rate_limit("startGame").max_requests, 3);
        assert_eq!(config.rate_limit("unknown").max_requests, 10);
    }
}
