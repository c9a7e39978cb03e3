use crate::config::LedgerConfig;
use crate::datum::PlutusData;
use crate::errors::{Result, VaultServiceError};
use crate::models::{Assets, TxHash, UnspentOutput};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Why a submission channel refused a transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitRejection {
    #[error("transaction already submitted")]
    AlreadySubmitted,
    #[error("inputs already spent: {0}")]
    InputsSpent(String),
    #[error("{0}")]
    Failed(String),
}

impl SubmitRejection {
    /// Sorts a node/service error message into a rejection kind.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("already submitted")
            || lower.contains("already in mempool")
            || lower.contains("already known")
            || lower.contains("duplicate")
        {
            SubmitRejection::AlreadySubmitted
        } else if lower.contains("badinputsutxo") || lower.contains("already spent") {
            SubmitRejection::InputsSpent(message.to_string())
        } else {
            SubmitRejection::Failed(message.to_string())
        }
    }
}

#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>>;

    async fn submit_transaction(&self, tx: &[u8]) -> std::result::Result<TxHash, SubmitRejection>;
}

#[derive(Debug, Deserialize)]
struct AmountEntry {
    unit: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct LedgerUtxo {
    tx_hash: String,
    output_index: u32,
    address: String,
    amount: Vec<AmountEntry>,
    #[serde(default)]
    data_hash: Option<String>,
    #[serde(default)]
    inline_datum: Option<PlutusData>,
}

impl TryFrom<LedgerUtxo> for UnspentOutput {
    type Error = VaultServiceError;

    fn try_from(raw: LedgerUtxo) -> Result<Self> {
        let mut amount = Assets::new();
        for entry in raw.amount {
            let quantity: u64 = entry.quantity.parse().map_err(|_| {
                VaultServiceError::Ledger(format!(
                    "bad quantity `{}` for {} in {}#{}",
                    entry.quantity, entry.unit, raw.tx_hash, raw.output_index
                ))
            })?;
            *amount.entry(entry.unit).or_insert(0) += quantity;
        }
        Ok(UnspentOutput {
            has_datum: raw.data_hash.is_some() || raw.inline_datum.is_some(),
            tx_hash: raw.tx_hash,
            output_index: raw.output_index,
            address: raw.address,
            amount,
            inline_datum: raw.inline_datum,
        })
    }
}

/// Ledger query service over HTTP.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl HttpLedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
        })
    }
}

#[async_trait]
impl LedgerQuery for HttpLedgerClient {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        let url = format!("{}/addresses/{}/utxos", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await?;

        // Addresses that never received funds are reported as missing.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VaultServiceError::Ledger(format!(
                "utxo query for {} failed with {}: {}",
                address, status, body
            )));
        }

        let raw: Vec<LedgerUtxo> = response.json().await?;
        log::debug!("Fetched {} outputs at {}", raw.len(), address);
        raw.into_iter().map(UnspentOutput::try_from).collect()
    }

    async fn submit_transaction(&self, tx: &[u8]) -> std::result::Result<TxHash, SubmitRejection> {
        let url = format!("{}/tx/submit", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("project_id", &self.project_id)
            .header("Content-Type", "application/cbor")
            .body(tx.to_vec())
            .send()
            .await
            .map_err(|e| SubmitRejection::Failed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmitRejection::Failed(e.to_string()))?;
        if !status.is_success() {
            return Err(SubmitRejection::classify(&body));
        }

        let hash = serde_json::from_str::<String>(&body)
            .unwrap_or_else(|_| body.trim().trim_matches('"').to_string());
        if hash.is_empty() {
            return Err(SubmitRejection::Failed("empty submission response".to_string()));
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOVELACE;

    #[test]
    fn test_classify_rejections() {
        assert_eq!(
            SubmitRejection::classify("Transaction already submitted"),
            SubmitRejection::AlreadySubmitted
        );
        assert!(matches!(
            SubmitRejection::classify("ShelleyTxValidationError BadInputsUTxO"),
            SubmitRejection::InputsSpent(_)
        ));
        assert!(matches!(
            SubmitRejection::classify("503 Service Unavailable"),
            SubmitRejection::Failed(_)
        ));
    }

    #[test]
    fn test_parses_ledger_utxo() {
        let raw: Vec<LedgerUtxo> = serde_json::from_value(serde_json::json!([
            {
                "tx_hash": "11".repeat(32),
                "output_index": 1,
                "address": "addr_test1vault",
                "amount": [
                    { "unit": "lovelace", "quantity": "70000000" },
                    { "unit": "policy.token", "quantity": "5" }
                ],
                "data_hash": null,
                "inline_datum": { "constructor": 0, "fields": [] }
            },
            {
                "tx_hash": "22".repeat(32),
                "output_index": 0,
                "address": "addr_test1wallet",
                "amount": [{ "unit": "lovelace", "quantity": "5000000" }]
            }
        ]))
        .unwrap();
        let utxos: Vec<UnspentOutput> = raw
            .into_iter()
            .map(UnspentOutput::try_from)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(utxos[0].lovelace(), 70_000_000);
        assert_eq!(utxos[0].amount["policy.token"], 5);
        assert!(utxos[0].has_datum);
        assert!(!utxos[1].has_datum);
        assert_eq!(utxos[1].amount[LOVELACE], 5_000_000);
    }

    #[test]
    fn test_rejects_bad_quantity() {
        let raw = LedgerUtxo {
            tx_hash: "11".repeat(32),
            output_index: 0,
            address: "addr_test1wallet".into(),
            amount: vec![AmountEntry {
                unit: "lovelace".into(),
                quantity: "lots".into(),
            }],
            data_hash: None,
            inline_datum: None,
        };
        assert!(UnspentOutput::try_from(raw).is_err());
    }
}
