//! Runtime configuration.
//!
//! RULE: Engines never read configuration ambiently. Every tunable is loaded
//! here once and handed to the engine entry point that needs it, so tests can
//! inject their own values.

use serde::{Deserialize, Serialize};

/// Late-payment accrual tunables, one row of global config in the original
/// deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Monthly penalty rate, in percent (1.5 means 1.5% per month).
    #[serde(default = "default_monthly_rate_pct")]
    pub monthly_rate_pct: f64,
    /// Days past the due date before an installment counts as late.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
}

fn default_monthly_rate_pct() -> f64 {
    1.5
}

fn default_grace_period_days() -> i64 {
    5
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            monthly_rate_pct: default_monthly_rate_pct(),
            grace_period_days: default_grace_period_days(),
        }
    }
}

impl PenaltyConfig {
    /// Per-day accrual rate as a fraction (monthly percent / 30 / 100).
    pub fn daily_rate(&self) -> f64 {
        self.monthly_rate_pct / 30.0 / 100.0
    }
}

/// Inbound gateway webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for HMAC verification of pushed events. When absent the
    /// engine runs unverified, which is logged as a security-relevant
    /// condition on every call.
    #[serde(default)]
    pub shared_secret: Option<String>,
}

/// Bearer-token signing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign and verify access-token claims.
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub penalty: PenaltyConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    pub auth: AuthConfig,
}

impl CoreConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {path}: {e}"))?;
        let config: CoreConfig = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {path}: {e}"))?;
        Ok(config)
    }

    /// Fixed configuration used by tests.
    pub fn default_test() -> Self {
        Self {
            penalty: PenaltyConfig::default(),
            webhook: WebhookConfig {
                shared_secret: Some("test-webhook-secret".into()),
            },
            auth: AuthConfig {
                token_secret: "test-token-secret".into(),
            },
        }
    }
}
