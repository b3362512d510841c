//! Signing capability and the EIP-712 message it signs.
//!
//! The builder never touches key material. It hands a [`TypedAuthorization`]
//! (domain + `TransferWithAuthorization` struct) to a [`SignerIdentity`], which
//! wraps whatever [`PaymentSigner`] the application constructed at startup.

use crate::errors::{Result, X402Error};
use crate::types::TransferAuthorization;
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::core::utils::keccak256;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;
use std::sync::Arc;

/// EIP-712 domain a payment signature is bound to.
///
/// Chain id and verifying contract tie the signature to one network and one
/// token; name/version tie it to the token's signing scheme version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningDomain {
    /// Token EIP-712 name
    pub name: String,
    /// Token EIP-712 version
    pub version: String,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Token contract
    pub verifying_contract: Address,
}

impl SigningDomain {
    /// `hashStruct(EIP712Domain)`.
    pub fn separator(&self) -> H256 {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        H256::from(keccak256(ethers::abi::encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ])))
    }
}

/// The structured message handed to a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedAuthorization {
    /// Signing domain
    pub domain: SigningDomain,
    /// Fields being authorized
    pub message: TransferAuthorization,
}

impl TypedAuthorization {
    /// The EIP-712 digest: `keccak256("\x19\x01" ‖ domainSeparator ‖ hashStruct(message))`.
    pub fn signing_hash(&self) -> H256 {
        let type_hash = keccak256(
            b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)",
        );
        let m = &self.message;
        let struct_hash = keccak256(ethers::abi::encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::Address(m.from),
            Token::Address(m.to),
            Token::Uint(m.value.into()),
            Token::Uint(U256::from(m.valid_after.as_secs())),
            Token::Uint(U256::from(m.valid_before.as_secs())),
            Token::FixedBytes(m.nonce.as_bytes().to_vec()),
        ]));

        let mut digest_input = Vec::with_capacity(66);
        digest_input.extend_from_slice(b"\x19\x01");
        digest_input.extend_from_slice(self.domain.separator().as_bytes());
        digest_input.extend_from_slice(&struct_hash);
        H256::from(keccak256(&digest_input))
    }
}

/// Something that can produce structured-data signatures for one address.
#[async_trait]
pub trait PaymentSigner: Send + Sync + 'static {
    /// Address whose funds are authorized.
    fn address(&self) -> Address;

    /// Signs the message, returning the 65 byte `r ‖ s ‖ v` signature.
    async fn sign(&self, message: &TypedAuthorization) -> Result<Bytes>;
}

#[async_trait]
impl PaymentSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign(&self, message: &TypedAuthorization) -> Result<Bytes> {
        let signature = self.sign_hash(message.signing_hash())?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

/// The payer identity, constructed once at startup and passed by reference.
#[derive(Clone)]
pub struct SignerIdentity {
    inner: Arc<dyn PaymentSigner>,
}

impl SignerIdentity {
    /// Wraps any signer implementation.
    pub fn new(signer: impl PaymentSigner) -> Self {
        Self {
            inner: Arc::new(signer),
        }
    }

    /// Builds a local signer from a hex private key (with or without `0x`).
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| X402Error::ConfigError(format!("invalid private key: {}", e)))?;
        Ok(Self::new(wallet))
    }

    /// Reads a private key from `var`. An unset or empty variable yields `None`.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Self::from_private_key(&key).map(Some),
            _ => Ok(None),
        }
    }

    /// Address whose funds are authorized.
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Signs `message`.
    ///
    /// The signature is produced on its own task, so dropping the caller's
    /// future does not abandon a signature half way; it always runs to completion.
    pub async fn sign(&self, message: TypedAuthorization) -> Result<Bytes> {
        let signer = Arc::clone(&self.inner);
        tokio::spawn(async move { signer.sign(&message).await })
            .await
            .map_err(|e| X402Error::SignatureError(format!("signing task failed: {}", e)))?
    }
}

impl fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("address", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenAmount, UnixTimestamp};
    use ethers::types::Signature;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn message(from: Address) -> TypedAuthorization {
        TypedAuthorization {
            domain: SigningDomain {
                name: "USDC".to_string(),
                version: "2".to_string(),
                chain_id: 84532,
                verifying_contract: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".parse().unwrap(),
            },
            message: TransferAuthorization {
                from,
                to: Address::repeat_byte(0x22),
                value: TokenAmount(100),
                valid_after: UnixTimestamp(1_700_000_000),
                valid_before: UnixTimestamp(1_700_000_060),
                nonce: H256::repeat_byte(0x33),
            },
        }
    }

    #[test]
    fn test_domain_separator_depends_on_chain() {
        let base = message(Address::zero()).domain;
        let mut other = base.clone();
        other.chain_id = 8453;
        assert_ne!(base.separator(), H256::zero());
        assert_ne!(base.separator(), other.separator());
    }

    #[tokio::test]
    async fn test_signature_recovers_to_signer() {
        let identity = SignerIdentity::from_private_key(TEST_KEY).unwrap();
        let typed = message(identity.address());
        let bytes = identity.sign(typed.clone()).await.unwrap();
        assert_eq!(bytes.len(), 65);

        let signature = Signature::try_from(bytes.as_ref()).unwrap();
        let recovered = signature.recover(typed.signing_hash()).unwrap();
        assert_eq!(recovered, identity.address());
    }

    #[tokio::test]
    async fn test_signature_is_domain_bound() {
        let identity = SignerIdentity::from_private_key(TEST_KEY).unwrap();
        let typed = message(identity.address());
        let bytes = identity.sign(typed.clone()).await.unwrap();

        let mut other_chain = typed.clone();
        other_chain.domain.chain_id = 8453;
        let signature = Signature::try_from(bytes.as_ref()).unwrap();
        assert_ne!(signature.recover(other_chain.signing_hash()).unwrap(), identity.address());
    }

    #[test]
    fn test_invalid_private_key() {
        assert!(matches!(
            SignerIdentity::from_private_key("0xnot-a-key"),
            Err(X402Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let identity = SignerIdentity::from_private_key(TEST_KEY).unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("address"));
        assert!(!debug.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"));
    }
}
