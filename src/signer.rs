//! Signing adapter.
//!
//! External signers answer a signing request in one of two shapes: the whole
//! transaction with witnesses attached, or a detached witness set that has to
//! be merged back into the body. The adapter walks an ordered list of
//! strategies, skipping those the signer says it cannot do, and stops at the
//! first one that yields a verified transaction.

use crate::errors::{Result, VaultServiceError};
use crate::ledger::SubmitRejection;
use crate::models::TxHash;
use crate::transaction::{SignedTransaction, UnsignedTransaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("declined: {0}")]
    Declined(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

/// What the signer reports about itself. `None` means it did not say.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerCapabilities {
    #[serde(default)]
    pub full_sign: Option<bool>,
    #[serde(default)]
    pub partial_sign: Option<bool>,
    /// Whether a full-sign request returns the whole transaction rather
    /// than a witness set.
    #[serde(default)]
    pub full_sign_returns_transaction: Option<bool>,
}

#[async_trait]
pub trait ExternalSigner: Send + Sync {
    async fn capabilities(&self) -> SignerCapabilities {
        SignerCapabilities::default()
    }

    async fn sign_transaction(
        &self,
        tx_hex: &str,
        want_full_sign: bool,
    ) -> std::result::Result<String, SignerError>;

    async fn submit_transaction(&self, tx_hex: &str) -> std::result::Result<TxHash, SubmitRejection>;

    async fn get_used_addresses(&self) -> std::result::Result<Vec<String>, SignerError>;
}

/// Merges a detached witness set into its transaction.
#[async_trait]
pub trait WitnessCombiner: Send + Sync {
    async fn combine(
        &self,
        unsigned_hex: &str,
        witness_hex: &str,
    ) -> std::result::Result<String, SignerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStrategy {
    CompleteSigning,
    PartialWithMerge,
}

impl SigningStrategy {
    pub const ORDER: [SigningStrategy; 2] = [
        SigningStrategy::CompleteSigning,
        SigningStrategy::PartialWithMerge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SigningStrategy::CompleteSigning => "complete-signing",
            SigningStrategy::PartialWithMerge => "partial-with-merge",
        }
    }

    pub fn is_supported(&self, capabilities: &SignerCapabilities) -> bool {
        match self {
            SigningStrategy::CompleteSigning => capabilities.full_sign != Some(false),
            SigningStrategy::PartialWithMerge => capabilities.partial_sign != Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Artifact {
    Transaction(String),
    Witness(String),
}

/// Decides what the signer handed back. A declared capability wins; the
/// length comparison is only the fallback.
fn classify(artifact: String, unsigned_hex_len: usize, declared_full: Option<bool>) -> Artifact {
    let is_full = declared_full.unwrap_or(artifact.len() >= unsigned_hex_len);
    if is_full {
        Artifact::Transaction(artifact)
    } else {
        Artifact::Witness(artifact)
    }
}

enum StrategyFailure {
    Declined(String),
    Failed(String),
}

impl From<SignerError> for StrategyFailure {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Declined(reason) => StrategyFailure::Declined(reason),
            other => StrategyFailure::Failed(other.to_string()),
        }
    }
}

impl From<VaultServiceError> for StrategyFailure {
    fn from(err: VaultServiceError) -> Self {
        StrategyFailure::Failed(err.to_string())
    }
}

pub struct SigningAdapter {
    signer: Arc<dyn ExternalSigner>,
    combiner: Arc<dyn WitnessCombiner>,
}

impl SigningAdapter {
    pub fn new(signer: Arc<dyn ExternalSigner>, combiner: Arc<dyn WitnessCombiner>) -> Self {
        Self { signer, combiner }
    }

    pub async fn sign(&self, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
        let capabilities = self.signer.capabilities().await;
        let mut failures = Vec::new();

        for strategy in SigningStrategy::ORDER {
            if !strategy.is_supported(&capabilities) {
                log::debug!("Signer does not support {}, skipping", strategy.name());
                continue;
            }

            match self.run(strategy, unsigned, &capabilities).await {
                Ok(signed) => {
                    log::info!("Transaction {} signed via {}", signed.tx_id, strategy.name());
                    return Ok(signed);
                }
                Err(StrategyFailure::Declined(reason)) => {
                    return Err(VaultServiceError::Signing(format!(
                        "signer declined: {}",
                        reason
                    )));
                }
                Err(StrategyFailure::Failed(reason)) => {
                    log::warn!("Signing strategy {} failed: {}", strategy.name(), reason);
                    failures.push(format!("{}: {}", strategy.name(), reason));
                }
            }
        }

        if failures.is_empty() {
            return Err(VaultServiceError::Signing(
                "signer supports no usable signing mode".to_string(),
            ));
        }
        Err(VaultServiceError::Signing(failures.join("; ")))
    }

    async fn run(
        &self,
        strategy: SigningStrategy,
        unsigned: &UnsignedTransaction,
        capabilities: &SignerCapabilities,
    ) -> std::result::Result<SignedTransaction, StrategyFailure> {
        let unsigned_hex = unsigned.to_hex();

        match strategy {
            SigningStrategy::CompleteSigning => {
                let artifact = self.signer.sign_transaction(&unsigned_hex, true).await?;
                match classify(
                    artifact,
                    unsigned_hex.len(),
                    capabilities.full_sign_returns_transaction,
                ) {
                    Artifact::Transaction(signed_hex) => Ok(decode_and_verify(&signed_hex, unsigned)?),
                    Artifact::Witness(_) => Err(StrategyFailure::Failed(
                        "signer returned a detached witness for a full-sign request".to_string(),
                    )),
                }
            }
            SigningStrategy::PartialWithMerge => {
                let artifact = self.signer.sign_transaction(&unsigned_hex, false).await?;
                match classify(artifact, unsigned_hex.len(), None) {
                    Artifact::Transaction(signed_hex) => Ok(decode_and_verify(&signed_hex, unsigned)?),
                    Artifact::Witness(witness_hex) => {
                        log::debug!("Merging detached witness through combiner");
                        let merged = self.combiner.combine(&unsigned_hex, &witness_hex).await?;
                        Ok(decode_and_verify(&merged, unsigned)?)
                    }
                }
            }
        }
    }
}

fn decode_and_verify(signed_hex: &str, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
    let bytes = hex::decode(signed_hex.trim())
        .map_err(|e| VaultServiceError::Signing(format!("signed transaction is not hex: {}", e)))?;
    SignedTransaction::verify(bytes, unsigned)
}
