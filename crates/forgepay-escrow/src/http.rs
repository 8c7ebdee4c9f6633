//! HTTP client for the escrow service.

use std::time::Duration;

use async_trait::async_trait;
use forgepay_core::Escrow;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::info;

use crate::error::GatewayError;
use crate::gateway::{
    ApproveMilestoneRequest, ChangeMilestoneStatusRequest, DeployRequest, EscrowGateway,
    FundRequest, SignedTransaction, SubmitOutcome, UnsignedTransaction,
};
use crate::response::{SubmitResponse, UnsignedTransactionResponse, parse_escrow};

const DEPLOY_ROUTE: &str = "/deployer/multi-release";
const FUND_ROUTE: &str = "/escrow/multi-release/fund-escrow";
const APPROVE_ROUTE: &str = "/escrow/multi-release/approve-milestone";
const CHANGE_STATUS_ROUTE: &str = "/escrow/multi-release/change-milestone-status";
const SUBMIT_ROUTE: &str = "/helper/send-transaction";
const GET_ESCROW_ROUTE: &str = "/escrow/multi-release/get-escrow";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the escrow service lives and how to authenticate to it.
#[derive(Debug, Clone)]
pub struct EscrowClientConfig {
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl EscrowClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`EscrowGateway`] over the service's REST endpoints.
pub struct EscrowClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EscrowClient {
    /// `base_url` should be like `https://escrow.example.com` (a trailing slash is trimmed).
    pub fn new(config: EscrowClientConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post<B, T>(&self, route: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        let resp = self
            .authorized(self.client.post(&url).json(body))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, route), query)
            .map_err(|e| GatewayError::UnexpectedResponse(format!("bad url: {e}")))?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Http(e)
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let text = resp.text().await.map_err(transport_error)?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl EscrowGateway for EscrowClient {
    async fn deploy_escrow(
        &self,
        req: &DeployRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        info!(
            engagement_id = %req.engagement_id,
            milestones = req.milestones.len(),
            "requesting escrow deploy transaction"
        );
        let resp: UnsignedTransactionResponse = self.post(DEPLOY_ROUTE, req).await?;
        Ok(resp.into())
    }

    async fn fund_escrow(&self, req: &FundRequest) -> Result<UnsignedTransaction, GatewayError> {
        info!(contract_id = %req.contract_id, amount = %req.amount, "requesting fund transaction");
        let resp: UnsignedTransactionResponse = self.post(FUND_ROUTE, req).await?;
        Ok(resp.into())
    }

    async fn approve_milestone(
        &self,
        req: &ApproveMilestoneRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        info!(
            contract_id = %req.contract_id,
            milestone_index = req.milestone_index,
            "requesting approve transaction"
        );
        let resp: UnsignedTransactionResponse = self.post(APPROVE_ROUTE, req).await?;
        Ok(resp.into())
    }

    async fn change_milestone_status(
        &self,
        req: &ChangeMilestoneStatusRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        info!(
            contract_id = %req.contract_id,
            milestone_index = req.milestone_index,
            new_status = %req.new_status,
            "requesting status-change transaction"
        );
        let resp: UnsignedTransactionResponse = self.post(CHANGE_STATUS_ROUTE, req).await?;
        Ok(resp.into())
    }

    async fn submit_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<SubmitOutcome, GatewayError> {
        let resp: SubmitResponse = self
            .post(SUBMIT_ROUTE, &json!({ "signedXdr": tx.xdr }))
            .await?;
        let outcome = resp.into_outcome()?;
        info!(contract_id = ?outcome.contract_id(), "transaction submitted");
        Ok(outcome)
    }

    async fn get_escrow(&self, contract_id: &str) -> Result<Escrow, GatewayError> {
        let body: serde_json::Value = self
            .get(GET_ESCROW_ROUTE, &[("contractId", contract_id)])
            .await?;
        parse_escrow(body)
    }
}
