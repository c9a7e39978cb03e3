use crate::errors::Result;
use crate::ledger::LedgerQuery;
use crate::models::{LockedOutput, VaultRecord, VaultSnapshot};
use crate::state_machine::VaultPhase;
use std::sync::Arc;

/// Reads the outputs locked at a vault address and decodes their records.
pub struct VaultStateReader {
    ledger: Arc<dyn LedgerQuery>,
}

impl VaultStateReader {
    pub fn new(ledger: Arc<dyn LedgerQuery>) -> Self {
        Self { ledger }
    }

    /// Outputs without a decodable inline datum are skipped: the script
    /// cannot spend them as vault state.
    pub async fn snapshot(&self, address: &str) -> Result<VaultSnapshot> {
        let utxos = self.ledger.get_unspent_outputs(address).await?;
        let mut outputs = Vec::with_capacity(utxos.len());

        for utxo in utxos {
            let Some(datum) = utxo.inline_datum.as_ref() else {
                log::warn!("Skipping vault output {} without inline datum", utxo.out_ref());
                continue;
            };
            match VaultRecord::try_from(datum) {
                Ok(record) => {
                    if record.balance_lovelace != utxo.lovelace() {
                        log::warn!(
                            "Vault output {} holds {} lovelace but its record says {}",
                            utxo.out_ref(),
                            utxo.lovelace(),
                            record.balance_lovelace
                        );
                    }
                    outputs.push(LockedOutput { utxo, record });
                }
                Err(e) => {
                    log::warn!("Skipping vault output {}: {}", utxo.out_ref(), e);
                }
            }
        }

        log::debug!("Vault {} has {} locked outputs", address, outputs.len());
        Ok(VaultSnapshot {
            address: address.to_string(),
            outputs,
        })
    }

    /// Current record of the vault, or `None` when nothing is locked there.
    /// Balance and stop flag cover every locked output; the rest comes from
    /// the largest one.
    pub async fn get_vault_state(&self, address: &str) -> Result<Option<VaultRecord>> {
        let snapshot = self.snapshot(address).await?;
        let total = snapshot.total_locked_lovelace();
        let stopped = snapshot.phase() == Some(VaultPhase::EmergencyStopped);
        Ok(snapshot.primary().map(|primary| VaultRecord {
            balance_lovelace: total,
            emergency_stop: stopped,
            ..primary.record.clone()
        }))
    }
}
