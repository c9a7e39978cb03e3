use crate::config::Config;
use crate::datum::PlutusData;
use crate::errors::{Result, VaultServiceError};
use crate::models::*;
use crate::selector::{FeeSelection, VaultSelection};
use crate::state_machine::{self, SignerRole};
use crate::transaction::{
    metadata_hash, RedeemerEntry, Transaction, TxBody, TxInput, TxOutput, UnsignedTransaction,
    WitnessSet,
};
use std::sync::Arc;

/// CIP-20 transaction message label.
const MESSAGE_LABEL: &str = "674";
const MESSAGE_LINE_LIMIT: usize = 64;

/// Where leftover vault value goes when no change-to-vault output is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leftover {
    ToChangeAddress,
    Forbidden,
}

pub struct TransactionBuilder {
    config: Arc<Config>,
}

impl TransactionBuilder {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Plan for `UserWithdraw(amount)`, paying the requester.
    pub fn plan_withdrawal(
        &self,
        selection: &VaultSelection,
        fees: &FeeSelection,
        amount: u64,
        requester_address: &str,
    ) -> Result<TransactionPlan> {
        let owner = common_owner(&selection.inputs)?;
        let redeemer = Redeemer::UserWithdraw(amount);
        let signer = self.signer_for(owner, &redeemer)?;
        let metadata = vec![
            "Vault withdrawal".to_string(),
            format!("Amount: {} ADA", lovelace_to_ada(amount)),
        ];
        self.plan_spend(
            selection,
            fees,
            redeemer,
            requester_address,
            requester_address,
            Leftover::ToChangeAddress,
            |record, balance| VaultRecord {
                balance_lovelace: balance,
                ..record.clone()
            },
            vec![signer],
            metadata,
        )
    }

    /// Plan for `AgentTrade(amount)`, paying the trading venue.
    pub fn plan_agent_trade(
        &self,
        selection: &VaultSelection,
        fees: &FeeSelection,
        amount: u64,
        destination: &str,
        agent_address: &str,
        now_millis: u64,
    ) -> Result<TransactionPlan> {
        let owner = common_owner(&selection.inputs)?;
        let redeemer = Redeemer::AgentTrade(amount);
        let agent_key = self.signer_for(owner, &redeemer)?;
        let metadata = vec![
            "Vault agent trade".to_string(),
            format!("Amount: {} ADA", lovelace_to_ada(amount)),
        ];
        self.plan_spend(
            selection,
            fees,
            redeemer,
            destination,
            agent_address,
            Leftover::Forbidden,
            |record, balance| VaultRecord {
                balance_lovelace: balance,
                trade_count: record.trade_count.saturating_add(1),
                last_trade_at_millis: now_millis,
                ..record.clone()
            },
            vec![agent_key],
            metadata,
        )
    }

    /// Plan for `EmergencyStop` / `ResumeTrading`. Every output in
    /// `vault_outputs` is recreated at the vault with its value untouched and
    /// only the stop flag of its own record flipped.
    pub fn plan_administrative(
        &self,
        vault_outputs: &[LockedOutput],
        fees: &FeeSelection,
        redeemer: Redeemer,
        requester_address: &str,
    ) -> Result<TransactionPlan> {
        if !redeemer.is_administrative() {
            return Err(VaultServiceError::assembly(format!(
                "{} is not an administrative redeemer",
                redeemer.name()
            )));
        }
        let owner = common_owner(vault_outputs)?;
        let signer = self.signer_for(owner, &redeemer)?;
        let collateral_input = first_fee_input(fees)?;

        let mut outputs = Vec::with_capacity(vault_outputs.len());
        for locked in vault_outputs {
            let next = state_machine::transition(&locked.record, &redeemer)?;
            outputs.push(PlannedOutput {
                role: OutputRole::VaultReturn,
                address: locked.utxo.address.clone(),
                value: locked.utxo.amount.clone(),
                datum: Some(next),
            });
        }
        let updated_datum = outputs.first().and_then(|o| o.datum.clone());

        Ok(TransactionPlan {
            selected_vault_inputs: vault_outputs.iter().map(|o| o.utxo.clone()).collect(),
            selected_fee_inputs: fees.inputs.clone(),
            collateral_input,
            outputs,
            redeemer,
            updated_datum,
            required_signers: vec![signer],
            change_address: requester_address.to_string(),
            metadata: vec![format!("Vault {}", redeemer.name())],
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_spend<F>(
        &self,
        selection: &VaultSelection,
        fees: &FeeSelection,
        redeemer: Redeemer,
        payee_address: &str,
        change_address: &str,
        leftover: Leftover,
        rewrite: F,
        required_signers: Vec<KeyHash>,
        metadata: Vec<String>,
    ) -> Result<TransactionPlan>
    where
        F: Fn(&VaultRecord, u64) -> VaultRecord,
    {
        let amount = match redeemer {
            Redeemer::UserWithdraw(amount) | Redeemer::AgentTrade(amount) => amount,
            other => {
                return Err(VaultServiceError::assembly(format!(
                    "{} does not move funds out of the vault",
                    other.name()
                )))
            }
        };
        let base = selection
            .inputs
            .first()
            .ok_or_else(|| VaultServiceError::assembly("no vault inputs selected"))?;
        for locked in &selection.inputs {
            state_machine::ensure_allowed(&locked.record, &redeemer)?;
        }
        let merged = state_machine::merged_record(selection.inputs.iter().map(|o| &o.record))
            .ok_or_else(|| VaultServiceError::assembly("no vault inputs selected"))?;
        let collateral_input = first_fee_input(fees)?;
        let policy = &self.config.policy;

        let vault_total = selection.total_lovelace();
        let remainder = vault_total.checked_sub(amount).ok_or_else(|| {
            VaultServiceError::InsufficientFunds {
                available: vault_total,
                required: amount,
                context: "selected vault outputs".to_string(),
            }
        })?;

        let recorded: u64 = selection.inputs.iter().map(|o| o.record.balance_lovelace).sum();
        if recorded != vault_total {
            log::warn!(
                "Vault records claim {} lovelace but outputs hold {}; rewriting from output value",
                recorded,
                vault_total
            );
        }

        let mut vault_tokens = Assets::new();
        for input in &selection.inputs {
            for (asset, quantity) in &input.utxo.amount {
                if asset != LOVELACE {
                    *vault_tokens.entry(asset.clone()).or_insert(0) += quantity;
                }
            }
        }

        let mut outputs = vec![PlannedOutput {
            role: OutputRole::Payee,
            address: payee_address.to_string(),
            value: Assets::from([(LOVELACE.to_string(), amount)]),
            datum: None,
        }];

        let makes_change = remainder.saturating_sub(policy.change_buffer) >= policy.dust_threshold;
        let updated_datum = if makes_change {
            let datum = rewrite(&merged, remainder);
            let mut value = Assets::from([(LOVELACE.to_string(), remainder)]);
            add_assets(&mut value, &vault_tokens);
            outputs.push(PlannedOutput {
                role: OutputRole::VaultChange,
                address: base.utxo.address.clone(),
                value,
                datum: Some(datum.clone()),
            });
            Some(datum)
        } else {
            if leftover == Leftover::Forbidden && (remainder > 0 || !vault_tokens.is_empty()) {
                return Err(VaultServiceError::validation(format!(
                    "{} would strand {} lovelace outside the vault",
                    redeemer.name(),
                    remainder
                )));
            }
            None
        };

        Ok(TransactionPlan {
            selected_vault_inputs: selection.inputs.iter().map(|o| o.utxo.clone()).collect(),
            selected_fee_inputs: fees.inputs.clone(),
            collateral_input,
            outputs,
            redeemer,
            updated_datum,
            required_signers,
            change_address: change_address.to_string(),
            metadata,
        })
    }

    fn signer_for(&self, owner: KeyHash, redeemer: &Redeemer) -> Result<KeyHash> {
        match state_machine::required_signer(owner, redeemer) {
            SignerRole::Owner(key) => Ok(key),
            SignerRole::Agent => self.config.vault.agent_key_hash.clone().ok_or_else(|| {
                VaultServiceError::Config("AGENT_KEY_HASH must be set for agent trades".to_string())
            }),
        }
    }

    /// Builds the unsigned transaction for `plan`. Fails closed: any broken
    /// invariant aborts with no partial artifact.
    pub fn assemble(&self, plan: &TransactionPlan) -> Result<UnsignedTransaction> {
        self.assemble_inner(plan).map_err(|e| {
            if let VaultServiceError::Assembly(_) = e {
                log::error!("Assembly aborted: {}; plan: {:?}", e, plan);
            }
            e
        })
    }

    fn assemble_inner(&self, plan: &TransactionPlan) -> Result<UnsignedTransaction> {
        self.check_plan(plan)?;
        let policy = &self.config.policy;

        let mut inputs: Vec<TxInput> = plan
            .selected_vault_inputs
            .iter()
            .chain(plan.selected_fee_inputs.iter())
            .map(to_tx_input)
            .collect();
        inputs.sort();
        inputs.dedup();
        if inputs.len() != plan.selected_vault_inputs.len() + plan.selected_fee_inputs.len() {
            return Err(VaultServiceError::assembly("an output is selected twice"));
        }

        let redeemer_data = PlutusData::try_from(&plan.redeemer)?;
        let mut redeemers = Vec::with_capacity(plan.selected_vault_inputs.len());
        for vault_input in &plan.selected_vault_inputs {
            let target = to_tx_input(vault_input);
            let index = inputs
                .iter()
                .position(|i| *i == target)
                .ok_or_else(|| VaultServiceError::assembly("vault input missing from input set"))?;
            redeemers.push(RedeemerEntry {
                tag: "spend".to_string(),
                index: index as u32,
                data: redeemer_data.clone(),
            });
        }

        let mut outputs = Vec::with_capacity(plan.outputs.len() + 1);
        for planned in &plan.outputs {
            let inline_datum = match &planned.datum {
                Some(record) => Some(PlutusData::try_from(record)?),
                None => None,
            };
            outputs.push(TxOutput {
                address: planned.address.clone(),
                amount: planned.value.clone(),
                inline_datum,
            });
        }

        let mut input_value = Assets::new();
        for input in plan.selected_vault_inputs.iter().chain(plan.selected_fee_inputs.iter()) {
            add_assets(&mut input_value, &input.amount);
        }
        let mut planned_value = Assets::new();
        for planned in &plan.outputs {
            add_assets(&mut planned_value, &planned.value);
        }
        let leftover = subtract_assets(&input_value, &planned_value)?;
        let leftover_lovelace = leftover.get(LOVELACE).copied().unwrap_or(0);
        let leftover_tokens: Assets = leftover
            .iter()
            .filter(|(asset, quantity)| asset.as_str() != LOVELACE && **quantity > 0)
            .map(|(asset, quantity)| (asset.clone(), *quantity))
            .collect();

        let metadata = message_metadata(&plan.metadata);
        let body = TxBody {
            inputs,
            collateral: vec![to_tx_input(&plan.collateral_input)],
            outputs,
            fee: 0,
            required_signers: plan.required_signers.clone(),
            network_id: self.config.vault.network_id,
            metadata_hash: Some(metadata_hash(&metadata)?),
        };
        let witness_set = WitnessSet {
            vkey_witnesses: Vec::new(),
            plutus_scripts: vec![self.config.vault.script_cbor.clone()],
            redeemers,
        };

        // Size upper bound: fee and change carry the full leftover, which has at
        // least as many digits as the final values.
        let mut draft = Transaction {
            body: body.clone(),
            witness_set: witness_set.clone(),
            is_valid: true,
            metadata: Some(metadata.clone()),
        };
        draft.body.fee = leftover_lovelace;
        let mut draft_change = leftover_tokens.clone();
        draft_change.insert(LOVELACE.to_string(), leftover_lovelace);
        draft.body.outputs.push(TxOutput {
            address: plan.change_address.clone(),
            amount: draft_change,
            inline_datum: None,
        });
        let signer_count = plan.required_signers.len().max(1) as u64;
        let size = draft.to_bytes()?.len() as u64 + policy.witness_size_estimate * signer_count;
        let mut fee = policy.min_fee_a * size
            + policy.min_fee_b
            + policy.script_fee_per_input * plan.selected_vault_inputs.len() as u64;

        if leftover_lovelace < fee {
            return Err(VaultServiceError::InsufficientFunds {
                available: leftover_lovelace,
                required: fee,
                context: "fee inputs cannot cover the transaction fee".to_string(),
            });
        }

        let change_lovelace = leftover_lovelace - fee;
        let mut tx = Transaction {
            body,
            witness_set,
            is_valid: true,
            metadata: Some(metadata),
        };
        if !leftover_tokens.is_empty() || change_lovelace >= policy.min_change {
            if change_lovelace < policy.min_change {
                return Err(VaultServiceError::InsufficientFunds {
                    available: change_lovelace,
                    required: policy.min_change,
                    context: "change output carrying tokens needs minimum ADA".to_string(),
                });
            }
            let mut change = leftover_tokens;
            change.insert(LOVELACE.to_string(), change_lovelace);
            tx.body.outputs.push(TxOutput {
                address: plan.change_address.clone(),
                amount: change,
                inline_datum: None,
            });
        } else {
            fee += change_lovelace;
        }
        tx.body.fee = fee;

        check_balance(&input_value, &tx.body)?;

        let unsigned = UnsignedTransaction::new(tx)?;
        log::info!(
            "Assembled {} transaction {} ({} inputs, {} outputs, fee {} lovelace)",
            plan.redeemer.name(),
            unsigned.tx_id,
            unsigned.tx.body.inputs.len(),
            unsigned.tx.body.outputs.len(),
            fee
        );
        Ok(unsigned)
    }

    fn check_plan(&self, plan: &TransactionPlan) -> Result<()> {
        let vault = &self.config.vault;
        if vault.script_cbor.is_empty() || hex::decode(&vault.script_cbor).is_err() {
            return Err(VaultServiceError::assembly("vault script is not configured"));
        }
        if plan.selected_vault_inputs.is_empty() {
            return Err(VaultServiceError::assembly("plan has no vault inputs"));
        }
        for input in &plan.selected_vault_inputs {
            if input.address != vault.script_address {
                return Err(VaultServiceError::assembly(format!(
                    "vault input {} is not locked by the vault script",
                    input.out_ref()
                )));
            }
            if input.inline_datum.is_none() {
                return Err(VaultServiceError::assembly(format!(
                    "vault input {} has no inline datum",
                    input.out_ref()
                )));
            }
        }
        if plan.selected_fee_inputs.is_empty() {
            return Err(VaultServiceError::assembly("plan has no fee inputs"));
        }
        if plan.selected_fee_inputs.first() != Some(&plan.collateral_input) {
            return Err(VaultServiceError::assembly(
                "collateral must be the first fee input",
            ));
        }
        if plan.selected_fee_inputs.iter().any(UnspentOutput::carries_datum) {
            return Err(VaultServiceError::assembly("fee inputs must not carry a datum"));
        }
        for output in &plan.outputs {
            match (output.role, &output.datum) {
                (OutputRole::Payee, None) => {}
                (OutputRole::Payee, Some(_)) => {
                    return Err(VaultServiceError::assembly("payee output carries a vault datum"))
                }
                (_, None) => {
                    return Err(VaultServiceError::assembly("vault output is missing its datum"))
                }
                (_, Some(record)) => {
                    if output.address != vault.script_address {
                        return Err(VaultServiceError::assembly(
                            "vault output is not addressed to the vault script",
                        ));
                    }
                    if record.balance_lovelace != output.lovelace() {
                        return Err(VaultServiceError::assembly(format!(
                            "datum balance {} does not match output value {}",
                            record.balance_lovelace,
                            output.lovelace()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn common_owner(vault_outputs: &[LockedOutput]) -> Result<KeyHash> {
    let mut owners = vault_outputs.iter().map(|o| &o.record.owner);
    let first = owners
        .next()
        .ok_or_else(|| VaultServiceError::assembly("no vault inputs selected"))?;
    if owners.any(|owner| owner != first) {
        return Err(VaultServiceError::assembly(
            "selected vault outputs belong to different owners",
        ));
    }
    Ok(first.clone())
}

/// Collateral is the first fee input; the fee selector orders pure-ADA
/// outputs first, so this only carries tokens when the wallet has no
/// pure-ADA output at all.
fn first_fee_input(fees: &FeeSelection) -> Result<UnspentOutput> {
    let collateral = fees.inputs.first().cloned().ok_or_else(|| VaultServiceError::InsufficientFunds {
        available: 0,
        required: 1,
        context: "no collateral input available".to_string(),
    })?;
    if !collateral.is_pure_ada() {
        log::warn!(
            "Collateral input {} carries native tokens; the ledger may reject it without a collateral return",
            collateral.out_ref()
        );
    }
    Ok(collateral)
}

fn to_tx_input(utxo: &UnspentOutput) -> TxInput {
    TxInput {
        tx_hash: utxo.tx_hash.clone(),
        output_index: utxo.output_index,
    }
}

fn subtract_assets(from: &Assets, amount: &Assets) -> Result<Assets> {
    let mut result = from.clone();
    for (asset, quantity) in amount {
        let available = result.get(asset).copied().unwrap_or(0);
        let rest = available.checked_sub(*quantity).ok_or_else(|| {
            VaultServiceError::assembly(format!(
                "outputs need {} of {} but inputs hold {}",
                quantity, asset, available
            ))
        })?;
        result.insert(asset.clone(), rest);
    }
    Ok(result)
}

/// inputs = outputs + fee, per asset.
fn check_balance(input_value: &Assets, body: &TxBody) -> Result<()> {
    let mut output_value = Assets::from([(LOVELACE.to_string(), body.fee)]);
    for output in &body.outputs {
        add_assets(&mut output_value, &output.amount);
    }
    let nonzero = |assets: &Assets| -> Assets {
        assets
            .iter()
            .filter(|(_, quantity)| **quantity > 0)
            .map(|(asset, quantity)| (asset.clone(), *quantity))
            .collect()
    };
    if nonzero(input_value) != nonzero(&output_value) {
        return Err(VaultServiceError::assembly(format!(
            "transaction does not balance: inputs {:?}, outputs + fee {:?}",
            input_value, output_value
        )));
    }
    Ok(())
}

fn message_metadata(lines: &[String]) -> serde_json::Value {
    let msg: Vec<String> = lines
        .iter()
        .map(|line| line.chars().take(MESSAGE_LINE_LIMIT).collect())
        .collect();
    serde_json::json!({ MESSAGE_LABEL: { "msg": msg } })
}
