//! Settlement configuration shared by the orchestrator and the CLI.
//!
//! All values are supplied by the environment; nothing here is computed.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::AccountId;
use crate::escrow::Trustline;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("platform fee {0} is outside 0-100")]
    PlatformFeeOutOfRange(Decimal),
}

/// Platform-wide settlement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    /// Percentage the platform keeps from each release.
    pub platform_fee: Decimal,
    /// Platform account; also the contract's dispute resolver.
    pub platform_address: AccountId,
    pub trustline: Trustline,
    /// Development bypass: create projects without deploying an escrow.
    pub skip_escrow: bool,
    /// Refuse to act on a milestone whose contract index could only be guessed.
    pub strict_index_mapping: bool,
}

impl SettlementConfig {
    pub fn new(platform_address: AccountId, trustline: Trustline) -> Self {
        Self {
            platform_fee: Decimal::ZERO,
            platform_address,
            trustline,
            skip_escrow: false,
            strict_index_mapping: false,
        }
    }

    pub fn with_platform_fee(mut self, fee: Decimal) -> Self {
        self.platform_fee = fee;
        self
    }

    pub fn with_skip_escrow(mut self, skip: bool) -> Self {
        self.skip_escrow = skip;
        self
    }

    pub fn with_strict_index_mapping(mut self, strict: bool) -> Self {
        self.strict_index_mapping = strict;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_fee < Decimal::ZERO || self.platform_fee > Decimal::ONE_HUNDRED {
            return Err(ConfigError::PlatformFeeOutOfRange(self.platform_fee));
        }
        if self.skip_escrow {
            tracing::warn!("escrow deployment is disabled; projects will not be backed by funds");
        }
        Ok(())
    }
}
