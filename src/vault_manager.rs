use crate::config::Config;
use crate::errors::{Result, VaultServiceError};
use crate::ledger::LedgerQuery;
use crate::models::*;
use crate::selector::{select_fee_inputs, select_vault_inputs};
use crate::signer::{ExternalSigner, SigningAdapter, WitnessCombiner};
use crate::state_machine::{self, VaultPhase};
use crate::submitter::{SubmissionAdapter, SubmitOutcome};
use crate::transaction::UnsignedTransaction;
use crate::transaction_builder::TransactionBuilder;
use crate::validator::WithdrawalValidator;
use crate::vault_state::VaultStateReader;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Runs one operation at a time from a fresh snapshot through submission.
/// Holds no state between operations besides its collaborators.
pub struct VaultManager {
    config: Arc<Config>,
    ledger: Arc<dyn LedgerQuery>,
    signer: Arc<dyn ExternalSigner>,
    reader: VaultStateReader,
    builder: TransactionBuilder,
    signing: SigningAdapter,
    submission: SubmissionAdapter,
    events: broadcast::Sender<WsMessage>,
}

impl VaultManager {
    pub fn new(
        config: Arc<Config>,
        ledger: Arc<dyn LedgerQuery>,
        signer: Arc<dyn ExternalSigner>,
        combiner: Arc<dyn WitnessCombiner>,
        events: broadcast::Sender<WsMessage>,
    ) -> Self {
        Self {
            reader: VaultStateReader::new(Arc::clone(&ledger)),
            builder: TransactionBuilder::new(Arc::clone(&config)),
            signing: SigningAdapter::new(Arc::clone(&signer), combiner),
            submission: SubmissionAdapter::new(Arc::clone(&signer), Arc::clone(&ledger)),
            config,
            ledger,
            signer,
            events,
        }
    }

    fn vault_address(&self) -> &str {
        &self.config.vault.script_address
    }

    /// Withdraw `amount_ada` from the vault to the requester's wallet.
    pub async fn request_withdrawal(&self, amount_ada: Decimal) -> OperationResponse {
        let operation = Uuid::new_v4();
        log::info!("[{}] Withdrawal of {} ADA requested", operation, amount_ada);

        match self.withdraw(amount_ada).await {
            Ok((amount, outcome)) => {
                let _ = self.events.send(WsMessage::Withdrawal {
                    vault: self.vault_address().to_string(),
                    amount,
                    tx_hash: outcome.tx_hash.clone(),
                });
                self.succeeded(operation, "withdrawal", outcome)
            }
            Err(e) => self.failed(operation, "withdrawal", e),
        }
    }

    /// Flip the emergency stop. `current_state` is the flag as the caller
    /// last saw it; a mismatch with the chain is rejected.
    pub async fn request_emergency_stop(&self, current_state: bool) -> OperationResponse {
        let operation = Uuid::new_v4();
        log::info!(
            "[{}] Emergency stop toggle requested (currently stopped: {})",
            operation,
            current_state
        );

        match self.toggle_emergency_stop(current_state).await {
            Ok(outcome) => {
                let _ = self.events.send(WsMessage::EmergencyStop {
                    vault: self.vault_address().to_string(),
                    stopped: !current_state,
                    tx_hash: outcome.tx_hash.clone(),
                });
                self.succeeded(operation, "emergency_stop", outcome)
            }
            Err(e) => self.failed(operation, "emergency_stop", e),
        }
    }

    /// Move `amount_ada` from the vault to the trading venue under the
    /// agent's key.
    pub async fn request_agent_trade(
        &self,
        amount_ada: Decimal,
        destination: Option<String>,
    ) -> OperationResponse {
        let operation = Uuid::new_v4();
        log::info!("[{}] Agent trade of {} ADA requested", operation, amount_ada);

        match self.agent_trade(amount_ada, destination).await {
            Ok((amount, outcome)) => {
                let _ = self.events.send(WsMessage::AgentTrade {
                    vault: self.vault_address().to_string(),
                    amount,
                    tx_hash: outcome.tx_hash.clone(),
                });
                self.succeeded(operation, "agent_trade", outcome)
            }
            Err(e) => self.failed(operation, "agent_trade", e),
        }
    }

    pub async fn get_vault_state(&self, address: &str) -> Result<Option<VaultRecord>> {
        self.reader.get_vault_state(address).await
    }

    async fn withdraw(&self, amount_ada: Decimal) -> Result<(u64, SubmitOutcome)> {
        let policy = &self.config.policy;
        let snapshot = self.reader.snapshot(self.vault_address()).await?;
        let requested = WithdrawalValidator::new(policy).validate(amount_ada, &snapshot)?;

        let selection = select_vault_inputs(&snapshot.outputs, requested, policy)?;
        let requester = self.requester_address().await?;
        let personal = self.ledger.get_unspent_outputs(&requester).await?;
        let fees = select_fee_inputs(&personal, policy)?;

        let intent = WithdrawalIntent {
            requested_ada: amount_ada,
            requester_address: requester,
        };
        let plan = self.builder.plan_withdrawal(
            &selection,
            &fees,
            requested,
            &intent.requester_address,
        )?;
        let unsigned = self.builder.assemble(&plan)?;
        let outcome = self.sign_and_submit(&unsigned).await?;
        Ok((requested, outcome))
    }

    async fn toggle_emergency_stop(&self, current_state: bool) -> Result<SubmitOutcome> {
        let snapshot = self.reader.snapshot(self.vault_address()).await?;
        let phase = snapshot.phase().ok_or_else(|| {
            VaultServiceError::validation(format!("No vault found at {}", self.vault_address()))
        })?;
        let stopped = phase == VaultPhase::EmergencyStopped;
        if stopped != current_state {
            return Err(VaultServiceError::validation(format!(
                "Vault emergency stop is {} on chain, not {}; refresh and retry",
                stopped, current_state
            )));
        }

        // Only outputs not already in the target state are spent.
        let target = !current_state;
        let flipping: Vec<LockedOutput> = snapshot
            .outputs
            .iter()
            .filter(|o| o.record.emergency_stop != target)
            .cloned()
            .collect();

        let redeemer = state_machine::toggle_for(current_state);
        let requester = self.requester_address().await?;
        let personal = self.ledger.get_unspent_outputs(&requester).await?;
        let fees = select_fee_inputs(&personal, &self.config.policy)?;

        let plan = self
            .builder
            .plan_administrative(&flipping, &fees, redeemer, &requester)?;
        let unsigned = self.builder.assemble(&plan)?;
        self.sign_and_submit(&unsigned).await
    }

    async fn agent_trade(
        &self,
        amount_ada: Decimal,
        destination: Option<String>,
    ) -> Result<(u64, SubmitOutcome)> {
        let policy = &self.config.policy;
        let destination = destination
            .or_else(|| self.config.vault.trading_venue_address.clone())
            .ok_or_else(|| VaultServiceError::validation("No trading venue address given"))?;

        let snapshot = self.reader.snapshot(self.vault_address()).await?;
        let validator = WithdrawalValidator::new(policy);
        let requested = validator.validate(amount_ada, &snapshot)?;

        // The trade may only draw on outputs whose own record allows it.
        let redeemer = Redeemer::AgentTrade(requested);
        let mut refusal = None;
        let mut eligible = Vec::new();
        for locked in &snapshot.outputs {
            match state_machine::ensure_allowed(&locked.record, &redeemer) {
                Ok(()) => eligible.push(locked.clone()),
                Err(e) => {
                    log::debug!("Vault output {} excluded from agent trade: {}", locked.utxo.out_ref(), e);
                    refusal.get_or_insert(e);
                }
            }
        }
        if eligible.is_empty() {
            return Err(refusal.unwrap_or_else(|| {
                VaultServiceError::validation(format!("No vault found at {}", self.vault_address()))
            }));
        }
        let eligible = VaultSnapshot {
            address: snapshot.address.clone(),
            outputs: eligible,
        };
        validator.validate(amount_ada, &eligible)?;

        let selection = select_vault_inputs(&eligible.outputs, requested, policy)?;
        let agent = self.requester_address().await?;
        let personal = self.ledger.get_unspent_outputs(&agent).await?;
        let fees = select_fee_inputs(&personal, policy)?;

        let now_millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let plan = self.builder.plan_agent_trade(
            &selection,
            &fees,
            requested,
            &destination,
            &agent,
            now_millis,
        )?;
        let unsigned = self.builder.assemble(&plan)?;
        let outcome = self.sign_and_submit(&unsigned).await?;
        Ok((requested, outcome))
    }

    async fn requester_address(&self) -> Result<String> {
        let addresses = self
            .signer
            .get_used_addresses()
            .await
            .map_err(|e| VaultServiceError::Signing(format!("could not read wallet addresses: {}", e)))?;
        addresses
            .into_iter()
            .next()
            .ok_or_else(|| VaultServiceError::validation("Wallet has no used addresses"))
    }

    async fn sign_and_submit(&self, unsigned: &UnsignedTransaction) -> Result<SubmitOutcome> {
        let signed = self.signing.sign(unsigned).await?;
        self.submission.submit(&signed).await
    }

    fn succeeded(&self, operation: Uuid, name: &str, outcome: SubmitOutcome) -> OperationResponse {
        log::info!(
            "[{}] {} submitted: {}{}",
            operation,
            name,
            outcome.tx_hash,
            if outcome.duplicate { " (duplicate)" } else { "" }
        );
        OperationResponse {
            success: true,
            tx_hash: Some(outcome.tx_hash),
            error: None,
            error_kind: None,
        }
    }

    fn failed(&self, operation: Uuid, name: &str, error: VaultServiceError) -> OperationResponse {
        match error {
            VaultServiceError::Assembly(_) => log::error!("[{}] {} failed: {}", operation, name, error),
            _ => log::warn!("[{}] {} failed: {}", operation, name, error),
        }
        let _ = self.events.send(WsMessage::Error {
            operation: name.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        OperationResponse {
            success: false,
            tx_hash: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
        }
    }
}
