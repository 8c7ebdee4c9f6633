//! Ledger account identifiers.
//!
//! Every role in an escrow contract (approver, service provider, platform,
//! release signer, dispute resolver) and every trustline issuer is addressed
//! by an ed25519 public key in strkey form (`G...`). Parsing validates the
//! version byte and checksum so malformed ids are rejected before any request
//! leaves the process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("account id is empty")]
    Empty,
    #[error("invalid account id {0:?}: expected a G... public key")]
    Invalid(String),
}

/// A validated ledger account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse and validate a strkey public key. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, AccountIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AccountIdError::Empty);
        }
        stellar_strkey::ed25519::PublicKey::from_string(s)
            .map_err(|_| AccountIdError::Invalid(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    /// Encode raw ed25519 public key bytes.
    pub fn from_public_key(bytes: [u8; 32]) -> Self {
        Self(stellar_strkey::ed25519::PublicKey(bytes).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}
