//! Settlement policy configuration.

use serde::Deserialize;

/// What the foreman commission percentage is applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionBasis {
    /// Percentage of the chit's total value, once per auction.
    #[default]
    ChitValue,
    /// Percentage of the period's discount amount.
    DiscountAmount,
}

/// Settlement policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub commission_basis: CommissionBasis,
    /// Upper bound on any chit's group size.
    pub max_group_size: u32,
    /// Whole-operation retry for period advances.
    pub retry: RetryConfig,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commission_basis: CommissionBasis::ChitValue,
            max_group_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient storage failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first failure.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 10,
            max_delay_ms: 500,
        }
    }
}
