//! Implementation of the "exact" payment scheme for EVM-compatible chains.
//!
//! This scheme uses EIP-3009 `transferWithAuthorization` for gasless ERC-20 transfers.
//! The payer signs an authorization for exactly `maxAmountRequired`; the
//! facilitator later submits it on-chain.

use crate::errors::{Result, X402Error};
use crate::networks::NetworkRegistry;
use crate::schemes::Scheme;
use crate::signer::{SignerIdentity, SigningDomain, TypedAuthorization};
use crate::types::{
    PaymentAuthorization, PaymentPayload, PaymentRequirements, RequirementsRef,
    TransferAuthorization, X402_VERSION,
};
use crate::utils::parse_address;
use async_trait::async_trait;

const EIP712_DOMAIN_NAME: &str = "USD Coin";
const EIP712_DOMAIN_VERSION: &str = "2";

/// Implementation of the "exact" scheme for EVM chains.
#[derive(Debug, Clone, Default)]
pub struct ExactEvm {
    networks: NetworkRegistry,
}

impl ExactEvm {
    /// Scheme identifier.
    pub const NAME: &'static str = "exact";

    /// Creates the scheme over a custom network registry.
    pub fn new(networks: NetworkRegistry) -> Self {
        Self { networks }
    }

    /// Builds the EIP-712 domain for the requirements' network and asset.
    ///
    /// Name/version come from `extra`, then from the known token deployment,
    /// then fall back to the USDC defaults.
    pub fn signing_domain(&self, requirements: &PaymentRequirements) -> Result<SigningDomain> {
        let network = self.networks.require(&requirements.network)?;
        let verifying_contract = parse_address(&requirements.asset)?;
        let known = self.networks.token(&requirements.network, &requirements.asset);

        let name = requirements
            .extra_str("name")
            .map(str::to_string)
            .or_else(|| known.map(|t| t.eip712_name.clone()))
            .unwrap_or_else(|| EIP712_DOMAIN_NAME.to_string());
        let version = requirements
            .extra_str("version")
            .map(str::to_string)
            .or_else(|| known.map(|t| t.eip712_version.clone()))
            .unwrap_or_else(|| EIP712_DOMAIN_VERSION.to_string());

        Ok(SigningDomain {
            name,
            version,
            chain_id: network.chain_id,
            verifying_contract,
        })
    }
}

fn mismatch(field: &str, expected: impl std::fmt::Display, got: impl std::fmt::Display) -> X402Error {
    X402Error::RequirementsMismatch(format!("{}: expected {}, got {}", field, expected, got))
}

#[async_trait]
impl Scheme for ExactEvm {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, requirements: &PaymentRequirements) -> bool {
        requirements.scheme == Self::NAME
            && self.networks.contains(&requirements.network)
            && parse_address(&requirements.asset).is_ok()
            && parse_address(&requirements.pay_to).is_ok()
    }

    async fn sign_payload(
        &self,
        requirements: &PaymentRequirements,
        authorization: TransferAuthorization,
        signer: &SignerIdentity,
    ) -> Result<PaymentPayload> {
        let typed = TypedAuthorization {
            domain: self.signing_domain(requirements)?,
            message: authorization,
        };
        let authorization = typed.message.clone();
        let signature = signer.sign(typed).await?;

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: Self::NAME.to_string(),
            network: requirements.network.clone(),
            accepted: RequirementsRef {
                resource: requirements.resource.clone(),
                asset: requirements.asset.clone(),
            },
            payload: PaymentAuthorization {
                signature,
                authorization,
            },
        })
    }

    fn check_requirements(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<()> {
        if payload.scheme != requirements.scheme {
            return Err(mismatch("scheme", &requirements.scheme, &payload.scheme));
        }
        if payload.network != requirements.network {
            return Err(mismatch("network", &requirements.network, &payload.network));
        }
        if payload.accepted.resource != requirements.resource {
            return Err(mismatch("resource", &requirements.resource, &payload.accepted.resource));
        }
        if !payload.accepted.asset.eq_ignore_ascii_case(&requirements.asset) {
            return Err(mismatch("asset", &requirements.asset, &payload.accepted.asset));
        }

        let authorization = &payload.payload.authorization;
        let expected_to = parse_address(&requirements.pay_to)?;
        if authorization.to != expected_to {
            return Err(mismatch("payTo", format!("{:?}", expected_to), format!("{:?}", authorization.to)));
        }
        if authorization.value != requirements.max_amount_required {
            return Err(mismatch("amount", requirements.max_amount_required, authorization.value));
        }
        Ok(())
    }
}
