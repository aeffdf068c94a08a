use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub notify: NotifyConfig,
    pub claims: ClaimConfig,
    pub channels: ChannelConfig,
    pub store: StoreConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "STORE_PATH",
    "TELEGRAM_BOT_TOKEN",
    "PUSH_GATEWAY_URL",
    "WHATSAPP_GATEWAY_URL",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TALLY_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TALLY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
            claims: ClaimConfig::from_env_profiled(p),
            channels: ChannelConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:     backfill_cap={}, concurrency={}",
            self.engine.backfill_cap,
            self.engine.concurrency
        );
        tracing::info!(
            "  notify:     attempts={}, timeout={}ms, backoff={}..{}ms",
            self.notify.max_attempts,
            self.notify.attempt_timeout_ms,
            self.notify.initial_backoff_ms,
            self.notify.max_backoff_ms
        );
        tracing::info!("  claims:     lease={}s", self.claims.lease_secs);
        tracing::info!(
            "  channels:   telegram={}, push={}, whatsapp={}",
            self.channels.telegram_bot_token.is_some(),
            self.channels.push_gateway_url.is_some(),
            self.channels.whatsapp_gateway_url.is_some()
        );
        tracing::info!("  store:      path={}", self.store.path.display());
    }

    /// Return a redacted view safe for output (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "engine": {
                "backfill_cap": self.engine.backfill_cap,
                "concurrency": self.engine.concurrency,
            },
            "notify": {
                "max_attempts": self.notify.max_attempts,
                "attempt_timeout_ms": self.notify.attempt_timeout_ms,
                "initial_backoff_ms": self.notify.initial_backoff_ms,
                "max_backoff_ms": self.notify.max_backoff_ms,
            },
            "claims": { "lease_secs": self.claims.lease_secs },
            "channels": {
                "telegram": self.channels.telegram_bot_token.is_some(),
                "push_gateway_url": self.channels.push_gateway_url,
                "whatsapp_gateway_url": self.channels.whatsapp_gateway_url,
                "gateway_auth": self.channels.gateway_auth_token.is_some(),
            },
            "store": { "path": self.store.path },
        })
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max occurrences generated per rule per invocation.
    pub backfill_cap: u32,
    /// Rules/cards evaluated concurrently within one invocation.
    pub concurrency: usize,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backfill_cap: profiled_env_u32(p, "BACKFILL_CAP", 24).max(1),
            concurrency: (profiled_env_u32(p, "ENGINE_CONCURRENCY", 8) as usize).max(1),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { backfill_cap: 24, concurrency: 8 }
    }
}

// ── Notification delivery ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Attempts per channel send, including the first.
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_attempts: profiled_env_u32(p, "NOTIFY_MAX_ATTEMPTS", 3).max(1),
            attempt_timeout_ms: profiled_env_u64(p, "NOTIFY_ATTEMPT_TIMEOUT_MS", 10_000),
            initial_backoff_ms: profiled_env_u64(p, "NOTIFY_INITIAL_BACKOFF_MS", 500),
            max_backoff_ms: profiled_env_u64(p, "NOTIFY_MAX_BACKOFF_MS", 8_000),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 10_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

// ── Delivery claims ───────────────────────────────────────────

/// Leases on reminder keys and confirmation requests claimed for sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Age after which an unfinished claim may be retaken.
    pub lease_secs: u64,
}

impl ClaimConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            lease_secs: profiled_env_u64(p, "CLAIM_LEASE_SECS", 900),
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self { lease_secs: 900 }
    }
}

// ── Channel credentials ───────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub telegram_bot_token: Option<String>,
    pub push_gateway_url: Option<String>,
    pub whatsapp_gateway_url: Option<String>,
    pub gateway_auth_token: Option<String>,
}

impl ChannelConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            telegram_bot_token: profiled_env_opt(p, "TELEGRAM_BOT_TOKEN"),
            push_gateway_url: profiled_env_opt(p, "PUSH_GATEWAY_URL"),
            whatsapp_gateway_url: profiled_env_opt(p, "WHATSAPP_GATEWAY_URL"),
            gateway_auth_token: profiled_env_opt(p, "GATEWAY_AUTH_TOKEN"),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_or(p, "STORE_PATH", "data/tally.json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_prefixed_keys_win() {
        env::set_var("CFGTEST_BACKFILL_CAP", "6");
        env::set_var("CFGTEST_STORE_PATH", "/tmp/cfgtest.json");
        let config = Config::for_profile("cfgtest");
        assert_eq!(config.profile_label(), "CFGTEST");
        assert_eq!(config.engine.backfill_cap, 6);
        assert_eq!(config.store.path, PathBuf::from("/tmp/cfgtest.json"));
        assert!(Config::available_profiles().contains(&"CFGTEST".to_string()));
        env::remove_var("CFGTEST_BACKFILL_CAP");
        env::remove_var("CFGTEST_STORE_PATH");
    }

    #[test]
    fn zero_values_are_raised_to_minimums() {
        env::set_var("CFGZERO_BACKFILL_CAP", "0");
        env::set_var("CFGZERO_NOTIFY_MAX_ATTEMPTS", "0");
        let config = Config::for_profile("CFGZERO");
        assert_eq!(config.engine.backfill_cap, 1);
        assert_eq!(config.notify.max_attempts, 1);
        env::remove_var("CFGZERO_BACKFILL_CAP");
        env::remove_var("CFGZERO_NOTIFY_MAX_ATTEMPTS");
    }

    #[test]
    fn redacted_summary_hides_tokens() {
        let mut config = Config::for_profile("CFGREDACT");
        config.channels.telegram_bot_token = Some("123:secret".into());
        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("secret"));
        assert_eq!(config.redacted_summary()["channels"]["telegram"], true);
    }
}
