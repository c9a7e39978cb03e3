use crate::errors::{Result, VaultServiceError};
use crate::ledger::{LedgerQuery, SubmitRejection};
use crate::models::TxHash;
use crate::signer::ExternalSigner;
use crate::transaction::SignedTransaction;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionChannel {
    /// The signer's own submission call; keeps provenance with the signer.
    Signer,
    /// The ledger query service's direct submission endpoint.
    Ledger,
}

impl SubmissionChannel {
    pub const ORDER: [SubmissionChannel; 2] = [SubmissionChannel::Signer, SubmissionChannel::Ledger];

    pub fn name(&self) -> &'static str {
        match self {
            SubmissionChannel::Signer => "signer",
            SubmissionChannel::Ledger => "ledger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub tx_hash: TxHash,
    pub channel: SubmissionChannel,
    /// The channel already knew this transaction.
    pub duplicate: bool,
}

pub struct SubmissionAdapter {
    signer: Arc<dyn ExternalSigner>,
    ledger: Arc<dyn LedgerQuery>,
}

impl SubmissionAdapter {
    pub fn new(signer: Arc<dyn ExternalSigner>, ledger: Arc<dyn LedgerQuery>) -> Self {
        Self { signer, ledger }
    }

    /// Submits the same bytes through each channel in order until one accepts.
    pub async fn submit(&self, signed: &SignedTransaction) -> Result<SubmitOutcome> {
        let mut failures: Vec<(SubmissionChannel, SubmitRejection)> = Vec::new();

        for channel in SubmissionChannel::ORDER {
            let attempt = match channel {
                SubmissionChannel::Signer => self.signer.submit_transaction(&signed.to_hex()).await,
                SubmissionChannel::Ledger => self.ledger.submit_transaction(&signed.bytes).await,
            };

            match attempt {
                Ok(tx_hash) => {
                    if tx_hash != signed.tx_id {
                        log::warn!(
                            "{} channel reported hash {} for transaction {}",
                            channel.name(),
                            tx_hash,
                            signed.tx_id
                        );
                    }
                    log::info!("Transaction {} submitted via {}", tx_hash, channel.name());
                    return Ok(SubmitOutcome {
                        tx_hash,
                        channel,
                        duplicate: false,
                    });
                }
                Err(SubmitRejection::AlreadySubmitted) => {
                    log::info!(
                        "Transaction {} was already submitted ({} channel)",
                        signed.tx_id,
                        channel.name()
                    );
                    return Ok(SubmitOutcome {
                        tx_hash: signed.tx_id.clone(),
                        channel,
                        duplicate: true,
                    });
                }
                Err(rejection) => {
                    log::warn!("Submission via {} failed: {}", channel.name(), rejection);
                    failures.push((channel, rejection));
                }
            }
        }

        let inputs_spent = failures
            .iter()
            .any(|(_, rejection)| matches!(rejection, SubmitRejection::InputsSpent(_)));
        let message_for = |wanted: SubmissionChannel| {
            failures
                .iter()
                .find(|(channel, _)| *channel == wanted)
                .map(|(_, rejection)| rejection.to_string())
                .unwrap_or_else(|| "not attempted".to_string())
        };

        Err(VaultServiceError::Submission {
            primary: message_for(SubmissionChannel::Signer),
            fallback: message_for(SubmissionChannel::Ledger),
            inputs_spent,
        })
    }
}
