use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::prison::BanPolicy;
use crate::types::Amount;

/// Configuration for the coinjoin coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Misbehavior policy
    pub prison: PrisonConfig,
    /// Audit publication
    pub audit: AuditConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Policy constants for the prison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrisonConfig {
    /// Ban for failing ownership or credential verification
    pub min_time_for_failed_to_verify_secs: u64,
    /// Ban for detected cheating
    pub min_time_for_cheating_secs: u64,
    /// Ban for disrupting a round with one coin; scales inversely with value
    pub penalty_per_coin_secs: u64,
    /// First disruption above this value is forgiven
    pub large_amount_threshold_sats: u64,
    /// Stage weights for round disruptions
    pub did_not_confirm_weight: u32,
    pub did_not_sign_weight: u32,
    pub double_spent_weight: u32,
    /// Ban multiplier per repeated disruption
    pub escalation_factor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// How long `stop` waits for queued offense records to reach the sink
    /// before leaving the flush to run in the background
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for PrisonConfig {
    fn default() -> Self {
        Self {
            min_time_for_failed_to_verify_secs: 31 * 24 * 3600,
            min_time_for_cheating_secs: 24 * 3600,
            penalty_per_coin_secs: 6 * 60,
            large_amount_threshold_sats: Amount::COIN,
            did_not_confirm_weight: 1,
            did_not_sign_weight: 2,
            double_spent_weight: 3,
            escalation_factor: 2,
        }
    }
}

impl PrisonConfig {
    /// Convert to the BanPolicy used by the Prison
    pub fn to_policy(&self) -> BanPolicy {
        BanPolicy {
            min_time_for_failed_to_verify: secs(self.min_time_for_failed_to_verify_secs),
            min_time_for_cheating: secs(self.min_time_for_cheating_secs),
            penalty_per_coin: secs(self.penalty_per_coin_secs),
            large_amount_threshold: Amount::from_sat(self.large_amount_threshold_sats),
            did_not_confirm_weight: self.did_not_confirm_weight,
            did_not_sign_weight: self.did_not_sign_weight,
            double_spent_weight: self.double_spent_weight,
            escalation_factor: self.escalation_factor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.penalty_per_coin_secs == 0 {
            return Err(anyhow!("penalty_per_coin_secs must be positive"));
        }

        if self.did_not_confirm_weight == 0 {
            return Err(anyhow!("did_not_confirm_weight must be positive"));
        }

        if self.did_not_sign_weight <= self.did_not_confirm_weight {
            return Err(anyhow!(
                "did_not_sign_weight ({}) must exceed did_not_confirm_weight ({})",
                self.did_not_sign_weight,
                self.did_not_confirm_weight
            ));
        }

        if self.double_spent_weight == 0 {
            return Err(anyhow!("double_spent_weight must be positive"));
        }

        if self.escalation_factor < 2 {
            return Err(anyhow!(
                "escalation_factor must be at least 2, got {}",
                self.escalation_factor
            ));
        }

        Ok(())
    }
}

fn secs(value: u64) -> chrono::Duration {
    let value = i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    chrono::Duration::seconds(value)
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `COINJOIN_*` variables resolved through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Prison configuration
        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_MIN_TIME_FOR_FAILED_TO_VERIFY_SECS")? {
            self.prison.min_time_for_failed_to_verify_secs = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_MIN_TIME_FOR_CHEATING_SECS")? {
            self.prison.min_time_for_cheating_secs = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_PENALTY_PER_COIN_SECS")? {
            self.prison.penalty_per_coin_secs = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_LARGE_AMOUNT_THRESHOLD_SATS")? {
            self.prison.large_amount_threshold_sats = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_DID_NOT_CONFIRM_WEIGHT")? {
            self.prison.did_not_confirm_weight = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_DID_NOT_SIGN_WEIGHT")? {
            self.prison.did_not_sign_weight = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_DOUBLE_SPENT_WEIGHT")? {
            self.prison.double_spent_weight = v;
        }

        if let Some(v) = parse_var(&lookup, "COINJOIN_PRISON_ESCALATION_FACTOR")? {
            self.prison.escalation_factor = v;
        }

        // Audit configuration
        if let Some(v) = parse_var(&lookup, "COINJOIN_AUDIT_STOP_TIMEOUT_SECS")? {
            self.audit.stop_timeout_secs = v;
        }

        // Logging configuration
        if let Some(level) = lookup("COINJOIN_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.prison.validate().context("Invalid prison configuration")?;

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(anyhow!("Unknown log level: {}", other)),
        }
    }

    /// Read the config file at `path`, writing defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "Loaded coordinator config");
            return Ok(config);
        }

        let config = Self::default();
        config.save(path)?;
        info!(path = %path.display(), "Created default coordinator config");
        Ok(config)
    }

    /// Write the config atomically. Readers sharing the directory see either
    /// the previous file or the complete new one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Config path has no file name: {}", path.display()))?;
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write temp config {}", tmp.display()))?;

        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to move config into {}", path.display()));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {} value", key)),
        None => Ok(None),
    }
}
