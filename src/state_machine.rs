use crate::errors::{Result, VaultServiceError};
use crate::models::{KeyHash, Redeemer, VaultRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VaultPhase {
    Active,
    EmergencyStopped,
}

impl VaultPhase {
    pub fn of(record: &VaultRecord) -> Self {
        if record.emergency_stop {
            VaultPhase::EmergencyStopped
        } else {
            VaultPhase::Active
        }
    }
}

/// Who must sign for a redeemer to be accepted by the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerRole {
    Owner(KeyHash),
    Agent,
}

/// Checks that `redeemer` is legal for `record` in its current phase.
pub fn ensure_allowed(record: &VaultRecord, redeemer: &Redeemer) -> Result<()> {
    let phase = VaultPhase::of(record);
    match (redeemer, phase) {
        (Redeemer::EmergencyStop, VaultPhase::Active)
        | (Redeemer::ResumeTrading, VaultPhase::EmergencyStopped)
        | (Redeemer::UserWithdraw(_), VaultPhase::Active)
        | (Redeemer::UserDeposit, VaultPhase::Active)
        | (Redeemer::UpdateSettings, _) => Ok(()),
        (Redeemer::AgentTrade(amount), VaultPhase::Active) => {
            if !record.agent_authorized {
                return Err(VaultServiceError::validation(
                    "Agent trading is not authorized for this vault",
                ));
            }
            if *amount > record.max_trade_amount_lovelace {
                return Err(VaultServiceError::validation(format!(
                    "Trade of {} lovelace exceeds the vault limit of {} lovelace",
                    amount, record.max_trade_amount_lovelace
                )));
            }
            Ok(())
        }
        (redeemer, phase) => Err(VaultServiceError::validation(format!(
            "{} is not allowed while the vault is {:?}",
            redeemer.name(),
            phase
        ))),
    }
}

/// Rewrites the record for an administrative transition. Only the
/// `emergency_stop` flag changes; the balance is untouched.
pub fn transition(record: &VaultRecord, redeemer: &Redeemer) -> Result<VaultRecord> {
    ensure_allowed(record, redeemer)?;
    let mut next = record.clone();
    match redeemer {
        Redeemer::EmergencyStop => next.emergency_stop = true,
        Redeemer::ResumeTrading => next.emergency_stop = false,
        other => {
            return Err(VaultServiceError::validation(format!(
                "{} is not an administrative transition",
                other.name()
            )))
        }
    }
    Ok(next)
}

/// Record for value merged back into the vault from several spent outputs.
/// Takes the most restrictive setting of each field so no spent output gains
/// permissions it did not have. The balance is left for the caller to set.
pub fn merged_record<'a, I>(records: I) -> Option<VaultRecord>
where
    I: IntoIterator<Item = &'a VaultRecord>,
{
    let mut records = records.into_iter();
    let mut merged = records.next()?.clone();
    for record in records {
        merged.agent_authorized &= record.agent_authorized;
        merged.emergency_stop |= record.emergency_stop;
        merged.max_trade_amount_lovelace = merged
            .max_trade_amount_lovelace
            .min(record.max_trade_amount_lovelace);
        merged.leverage_limit = merged.leverage_limit.min(record.leverage_limit);
        merged.trade_count = merged.trade_count.max(record.trade_count);
        merged.last_trade_at_millis = merged.last_trade_at_millis.max(record.last_trade_at_millis);
        merged.created_at_millis = merged.created_at_millis.min(record.created_at_millis);
    }
    Some(merged)
}

/// Redeemer that moves the vault away from the state the caller believes it is in.
pub fn toggle_for(current_stopped: bool) -> Redeemer {
    if current_stopped {
        Redeemer::ResumeTrading
    } else {
        Redeemer::EmergencyStop
    }
}

pub fn required_signer(owner: KeyHash, redeemer: &Redeemer) -> SignerRole {
    match redeemer {
        Redeemer::AgentTrade(_) => SignerRole::Agent,
        _ => SignerRole::Owner(owner),
    }
}
