use crate::config::SignerConfig;
use crate::errors::Result;
use crate::ledger::SubmitRejection;
use crate::models::TxHash;
use crate::signer::{ExternalSigner, SignerCapabilities, SignerError, WitnessCombiner};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wallet-style error codes returned by the bridge.
const CODE_PROOF_GENERATION: i32 = 1;
const CODE_USER_DECLINED: i32 = 2;

#[derive(Debug, Deserialize)]
struct BridgeResult<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    tx: &'a str,
    partial: bool,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    tx: &'a str,
}

#[derive(Debug, Serialize)]
struct CombineRequest<'a> {
    tx: &'a str,
    witness: &'a str,
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

async fn read_bridge<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, SignerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SignerError::Failed(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_str::<BridgeResult<T>>(&body)
            .map(|wrapped| wrapped.result)
            .map_err(|e| SignerError::Failed(format!("unexpected bridge response: {}", e)));
    }

    if status == StatusCode::NOT_IMPLEMENTED {
        return Err(SignerError::Unsupported(body));
    }
    match serde_json::from_str::<BridgeError>(&body) {
        Ok(err) if err.code == CODE_USER_DECLINED => Err(SignerError::Declined(err.info)),
        Ok(err) if err.code == CODE_PROOF_GENERATION => {
            Err(SignerError::Failed(format!("proof generation failed: {}", err.info)))
        }
        Ok(err) => Err(SignerError::Failed(format!("{} ({})", err.info, status))),
        Err(_) => Err(SignerError::Failed(format!("{}: {}", status, body))),
    }
}

/// HTTP bridge to the user's wallet.
pub struct HttpSignerBridge {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignerBridge {
    pub fn new(config: &SignerConfig, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: config.bridge_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExternalSigner for HttpSignerBridge {
    async fn capabilities(&self) -> SignerCapabilities {
        let url = format!("{}/capabilities", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Signer capability query failed: {}", e);
                return SignerCapabilities::default();
            }
        };
        read_bridge::<SignerCapabilities>(response)
            .await
            .unwrap_or_else(|e| {
                log::debug!("Signer did not report capabilities: {}", e);
                SignerCapabilities::default()
            })
    }

    async fn sign_transaction(
        &self,
        tx_hex: &str,
        want_full_sign: bool,
    ) -> std::result::Result<String, SignerError> {
        let url = format!("{}/sign", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SignRequest {
                tx: tx_hex,
                partial: !want_full_sign,
            })
            .send()
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        read_bridge(response).await
    }

    async fn submit_transaction(&self, tx_hex: &str) -> std::result::Result<TxHash, SubmitRejection> {
        let url = format!("{}/submit", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitRequest { tx: tx_hex })
            .send()
            .await
            .map_err(|e| SubmitRejection::Failed(e.to_string()))?;
        read_bridge(response)
            .await
            .map_err(|e| SubmitRejection::classify(&e.to_string()))
    }

    async fn get_used_addresses(&self) -> std::result::Result<Vec<String>, SignerError> {
        let url = format!("{}/addresses", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        read_bridge(response).await
    }
}

/// HTTP client for the witness-combiner service.
pub struct HttpWitnessCombiner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWitnessCombiner {
    pub fn new(config: &SignerConfig, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: config.combiner_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WitnessCombiner for HttpWitnessCombiner {
    async fn combine(
        &self,
        unsigned_hex: &str,
        witness_hex: &str,
    ) -> std::result::Result<String, SignerError> {
        let url = format!("{}/combine", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CombineRequest {
                tx: unsigned_hex,
                witness: witness_hex,
            })
            .send()
            .await
            .map_err(|e| SignerError::Failed(format!("combiner unreachable: {}", e)))?;
        read_bridge(response).await
    }
}
