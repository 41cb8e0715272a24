//! Application-level configuration loading: scoring, timings, join rules and retries.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::scoring::ScoringPolicy;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Formula applied to every correct answer.
    pub scoring: ScoringPolicy,
    /// Fixed delays and timer intervals.
    pub timing: TimingConfig,
    /// Admission rules for new players.
    pub joins: JoinConfig,
    /// Bounded retry policy for idempotent store calls.
    pub retry: RetryConfig,
    /// Buffer size of each per-session broadcast channel.
    pub channel_capacity: usize,
    /// Host ids allowed to act on any session.
    pub admin_host_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Fixed delays used by the controllers and self-paced runner.
pub struct TimingConfig {
    /// "Get ready" pause between start and the first question.
    pub start_delay_secs: u64,
    /// Pause between two self-paced questions.
    pub self_paced_transition_secs: u64,
    /// Interval at which controllers refetch answers from the store.
    pub reconcile_interval_secs: u64,
    /// Upper bound for a single state transition.
    pub transition_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Join admission settings.
pub struct JoinConfig {
    /// Live sessions refuse to start with nobody joined.
    pub live_requires_players: bool,
    /// Longest accepted display name, in characters.
    pub max_display_name_length: usize,
    /// Email domains rejected for self-paced joins.
    pub disposable_email_domains: Vec<String>,
    /// Window during which a network address may not join the same quiz again.
    pub network_rejoin_window_secs: u64,
    /// How many random join codes to try before giving up.
    pub join_code_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Exponential backoff settings.
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Cap applied to the doubling delay.
    pub max_delay_ms: u64,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        scoring = ?config.scoring,
                        disposable_domains = config.joins.disposable_email_domains.len(),
                        "loaded configuration"
                    );
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

    /// Whether `host_id` may act on sessions it does not own.
    pub fn is_admin(&self, host_id: Uuid) -> bool {
        self.admin_host_ids.contains(&host_id)
    }
}

impl TimingConfig {
    /// Start delay as a [`Duration`].
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    /// Self-paced transition as a [`Duration`].
    pub fn self_paced_transition(&self) -> Duration {
        Duration::from_secs(self.self_paced_transition_secs)
    }

    /// Reconciliation interval as a [`Duration`], never zero.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    /// Transition timeout as a [`Duration`].
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs.max(1))
    }
}

impl JoinConfig {
    /// Rejoin window as a [`Duration`].
    pub fn network_rejoin_window(&self) -> Duration {
        Duration::from_secs(self.network_rejoin_window_secs)
    }

    /// Whether `domain` belongs to the disposable-provider deny-list.
    pub fn is_disposable(&self, domain: &str) -> bool {
        self.disposable_email_domains
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(domain))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            timing: TimingConfig::default(),
            joins: JoinConfig::default(),
            retry: RetryConfig::default(),
            channel_capacity: 64,
            admin_host_ids: Vec::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_delay_secs: 3,
            self_paced_transition_secs: 5,
            reconcile_interval_secs: 5,
            transition_timeout_secs: 5,
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            live_requires_players: true,
            max_display_name_length: 32,
            disposable_email_domains: default_disposable_domains(),
            network_rejoin_window_secs: 3600,
            join_code_attempts: 20,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
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

/// Built-in deny-list of throwaway mailbox providers.
fn default_disposable_domains() -> Vec<String> {
    [
        "mailinator.com",
        "guerrillamail.com",
        "10minutemail.com",
        "tempmail.com",
        "temp-mail.org",
        "yopmail.com",
        "trashmail.com",
        "sharklasers.com",
        "getnada.com",
        "dispostable.com",
        "throwawaymail.com",
        "maildrop.cc",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let config: AppConfig = serde_json::from_str(
            r#"{"scoring": {"kind": "time_bonus", "base": 50, "max_bonus": 50}, "timing": {"start_delay_secs": 1}}"#,
        )
        .unwrap();

        assert_eq!(
            config.scoring,
            ScoringPolicy::TimeBonus {
                base: 50,
                max_bonus: 50
            }
        );
        assert_eq!(config.timing.start_delay_secs, 1);
        assert_eq!(config.timing.self_paced_transition_secs, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.joins.live_requires_players);
    }

    #[test]
    fn disposable_domains_match_case_insensitively() {
        let joins = JoinConfig::default();
        assert!(joins.is_disposable("Mailinator.COM"));
        assert!(!joins.is_disposable("example.org"));
    }
}
