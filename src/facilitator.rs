//! Client for a remote x402 facilitator.
//!
//! A facilitator is the external service that verifies payment payloads and
//! settles them on-chain for the resource server. [`FacilitatorClient`] talks to
//! its `/verify`, `/settle` and `/supported` endpoints.
//!
//! The verify + settle exchange is bounded by a single timeout. Running out of
//! time, failing to connect or getting a 5xx all map to
//! [`X402Error::ServiceUnavailable`]; an explicit "invalid" answer maps to a
//! rejected [`SettlementReceipt`]. The two must never be confused: an outage is
//! not evidence that the payment was bad. Nothing is retried here, since
//! settlement is not guaranteed to be idempotent.

use crate::errors::{Result, X402Error};
use crate::types::{
    FacilitatorRequest, PaymentPayload, PaymentRequirements, SettleResponse, SettlementReceipt,
    SupportedResponse, VerifyResponse, X402_VERSION,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Verification and settlement of a locally checked payment.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Verifies then settles `payload` against `requirements`.
    ///
    /// Returns `Ok` with a rejected receipt when the facilitator refuses the
    /// payment and `Err(ServiceUnavailable)` when no verdict came back.
    ///
    /// `ServiceUnavailable` can also mean the settlement state is unknown: an
    /// outage after `/settle` was sent may hide a transfer that went through.
    /// Presenting the same authorization again is still safe, since the token
    /// contract refuses a nonce it has already consumed.
    async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementReceipt>;
}

/// A client for communicating with a remote x402 facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Default bound on one verify + settle exchange.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Constructs a client from a base URL such as `https://x402.org/facilitator`.
    ///
    /// Endpoint URLs are resolved relative to the base, which is treated as a directory.
    pub fn try_new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            verify_url: base_url.join("verify")?,
            settle_url: base_url.join("settle")?,
            supported_url: base_url.join("supported")?,
            base_url,
            client: Client::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Sets the bound on one verify + settle exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses a custom HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the base URL used by this client.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the `/verify` URL.
    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the `/settle` URL.
    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a `POST /verify` request to the facilitator.
    pub async fn verify(&self, request: &FacilitatorRequest) -> Result<VerifyResponse> {
        self.post_json(&self.verify_url, "POST /verify", request).await
    }

    /// Sends a `POST /settle` request to the facilitator.
    pub async fn settle(&self, request: &FacilitatorRequest) -> Result<SettleResponse> {
        self.post_json(&self.settle_url, "POST /settle", request).await
    }

    /// Sends a `GET /supported` request to the facilitator.
    pub async fn supported(&self) -> Result<SupportedResponse> {
        let context = "GET /supported";
        let response = self
            .client
            .get(self.supported_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unavailable(context, e))?;
        read_json(context, response).await
    }

    async fn post_json<T, R>(&self, url: &Url, context: &'static str, payload: &T) -> Result<R>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| unavailable(context, e))?;
        read_json(context, response).await
    }

    async fn exchange(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementReceipt> {
        let request = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload.clone(),
            payment_requirements: requirements.clone(),
        };
        let payer = payload.payer();

        let verification = self.verify(&request).await?;
        if !verification.is_valid {
            let reason = verification
                .invalid_reason
                .unwrap_or_else(|| "invalid_payment".to_string());
            tracing::warn!(payer = ?payer, reason = %reason, "facilitator refused payment at verify");
            return Ok(SettlementReceipt::rejected(reason, &payload.network, payer));
        }

        let settlement = self.settle(&request).await?;
        if !settlement.success {
            let reason = settlement
                .error_reason
                .unwrap_or_else(|| "settlement_failed".to_string());
            tracing::warn!(payer = ?payer, reason = %reason, "facilitator refused payment at settle");
            return Ok(SettlementReceipt::rejected(reason, &payload.network, payer));
        }

        let network = settlement.network.unwrap_or_else(|| payload.network.clone());
        Ok(SettlementReceipt::settled(
            settlement.settlement_ref.unwrap_or_default(),
            network,
            payer,
        ))
    }
}

#[async_trait]
impl Facilitator for FacilitatorClient {
    async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementReceipt> {
        match tokio::time::timeout(self.timeout, self.exchange(payload, requirements)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, url = %self.base_url, "facilitator timed out");
                Err(X402Error::ServiceUnavailable(format!(
                    "no answer within {:?}",
                    self.timeout
                )))
            }
        }
    }
}

fn unavailable(context: &str, err: reqwest::Error) -> X402Error {
    X402Error::ServiceUnavailable(format!("{}: {}", context, err))
}

async fn read_json<R: serde::de::DeserializeOwned>(
    context: &str,
    response: reqwest::Response,
) -> Result<R> {
    let status = response.status();
    if status.is_server_error() {
        return Err(X402Error::ServiceUnavailable(format!(
            "{}: facilitator answered {}",
            context, status
        )));
    }
    let body = response.bytes().await.map_err(|e| unavailable(context, e))?;
    serde_json::from_slice(&body).map_err(|e| {
        X402Error::ServiceUnavailable(format!(
            "{}: unexpected response ({}): {}",
            context, status, e
        ))
    })
}
