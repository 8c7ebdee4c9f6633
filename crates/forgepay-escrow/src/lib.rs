//! Escrow gateway: settlement intents in, unsigned transactions out, signed
//! transactions submitted to the ledger.

mod error;
mod gateway;
mod response;
mod signer;

pub use error::GatewayError;
pub use gateway::{
    ApproveMilestoneRequest, ChangeMilestoneStatusRequest, DeployMilestone, DeployRequest,
    EscrowGateway, FundRequest, SignedTransaction, SubmitOutcome, UnsignedTransaction,
};
pub use signer::{
    KeypairSigner, PUBLIC_NETWORK_PASSPHRASE, SignError, TESTNET_PASSPHRASE, TransactionSigner,
};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{EscrowClient, EscrowClientConfig};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockGateway, Operation};
