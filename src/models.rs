use crate::config::LOVELACE_PER_ADA;
use crate::datum::PlutusData;
use crate::state_machine::VaultPhase;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Asset id of the native coin in an output's value map.
pub const LOVELACE: &str = "lovelace";

pub type KeyHash = String;
pub type TxHash = String;
pub type AssetId = String;
pub type Assets = BTreeMap<AssetId, u64>;

/// On-chain record stored as the inline datum of every vault output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultRecord {
    pub owner: KeyHash,
    pub balance_lovelace: u64,
    pub agent_authorized: bool,
    pub emergency_stop: bool,
    pub max_trade_amount_lovelace: u64,
    pub leverage_limit: u32,
    pub trade_count: u32,
    pub last_trade_at_millis: u64,
    pub created_at_millis: u64,
}

/// An unspent output as reported by the ledger query service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnspentOutput {
    pub tx_hash: TxHash,
    pub output_index: u32,
    pub address: String,
    pub amount: Assets,
    #[serde(default)]
    pub has_datum: bool,
    #[serde(default)]
    pub inline_datum: Option<PlutusData>,
}

impl UnspentOutput {
    pub fn lovelace(&self) -> u64 {
        self.amount.get(LOVELACE).copied().unwrap_or(0)
    }

    /// True when the output carries nothing but the native coin.
    pub fn is_pure_ada(&self) -> bool {
        self.amount
            .iter()
            .all(|(asset, quantity)| asset == LOVELACE || *quantity == 0)
    }

    pub fn carries_datum(&self) -> bool {
        self.has_datum || self.inline_datum.is_some()
    }

    pub fn out_ref(&self) -> String {
        format!("{}#{}", self.tx_hash, self.output_index)
    }
}

/// A locked vault output paired with its decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedOutput {
    pub utxo: UnspentOutput,
    pub record: VaultRecord,
}

/// Read-only view of the vault taken at the start of an operation.
#[derive(Debug, Clone, Default)]
pub struct VaultSnapshot {
    pub address: String,
    pub outputs: Vec<LockedOutput>,
}

impl VaultSnapshot {
    pub fn total_locked_lovelace(&self) -> u64 {
        self.outputs.iter().map(|o| o.utxo.lovelace()).sum()
    }

    /// Phase of the vault as a whole: stopped when any locked output is.
    /// `None` when nothing is locked.
    pub fn phase(&self) -> Option<VaultPhase> {
        if self.outputs.is_empty() {
            None
        } else if self.outputs.iter().any(|o| o.record.emergency_stop) {
            Some(VaultPhase::EmergencyStopped)
        } else {
            Some(VaultPhase::Active)
        }
    }

    /// Record of the largest locked output.
    pub fn primary(&self) -> Option<&LockedOutput> {
        self.outputs.iter().max_by(|a, b| {
            a.utxo
                .lovelace()
                .cmp(&b.utxo.lovelace())
                .then_with(|| b.utxo.out_ref().cmp(&a.utxo.out_ref()))
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "amount", rename_all = "snake_case")]
pub enum Redeemer {
    UserDeposit,
    UserWithdraw(u64),
    AgentTrade(u64),
    EmergencyStop,
    ResumeTrading,
    UpdateSettings,
}

impl Redeemer {
    pub fn name(&self) -> &'static str {
        match self {
            Redeemer::UserDeposit => "UserDeposit",
            Redeemer::UserWithdraw(_) => "UserWithdraw",
            Redeemer::AgentTrade(_) => "AgentTrade",
            Redeemer::EmergencyStop => "EmergencyStop",
            Redeemer::ResumeTrading => "ResumeTrading",
            Redeemer::UpdateSettings => "UpdateSettings",
        }
    }

    pub fn is_administrative(&self) -> bool {
        matches!(self, Redeemer::EmergencyStop | Redeemer::ResumeTrading)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalIntent {
    pub requested_ada: Decimal,
    pub requester_address: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    /// Pays the requester or the trading venue.
    Payee,
    /// Remainder routed back to the vault with a rewritten record.
    VaultChange,
    /// Administrative path: the vault output recreated in full.
    VaultReturn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedOutput {
    pub role: OutputRole,
    pub address: String,
    pub value: Assets,
    pub datum: Option<VaultRecord>,
}

impl PlannedOutput {
    pub fn lovelace(&self) -> u64 {
        self.value.get(LOVELACE).copied().unwrap_or(0)
    }
}

/// Everything needed to build one unsigned transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub selected_vault_inputs: Vec<UnspentOutput>,
    pub selected_fee_inputs: Vec<UnspentOutput>,
    pub collateral_input: UnspentOutput,
    pub outputs: Vec<PlannedOutput>,
    pub redeemer: Redeemer,
    pub updated_datum: Option<VaultRecord>,
    pub required_signers: Vec<KeyHash>,
    pub change_address: String,
    pub metadata: Vec<String>,
}

pub fn ada_to_lovelace(ada: Decimal) -> Option<u64> {
    let scaled = ada.checked_mul(Decimal::from(LOVELACE_PER_ADA))?;
    if scaled.fract() != Decimal::ZERO || scaled.is_sign_negative() {
        return None;
    }
    scaled.to_u64()
}

pub fn lovelace_to_ada(lovelace: u64) -> Decimal {
    Decimal::from(lovelace) / Decimal::from(LOVELACE_PER_ADA)
}

pub fn add_assets(into: &mut Assets, from: &Assets) {
    for (asset, quantity) in from {
        *into.entry(asset.clone()).or_insert(0) += quantity;
    }
}

// ============ API Request/Response Models ============

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub amount_ada: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmergencyStopRequest {
    pub current_state: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentTradeRequest {
    pub amount_ada: Decimal,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResponse {
    pub success: bool,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// ============ WebSocket Messages ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "withdrawal")]
    Withdrawal {
        vault: String,
        amount: u64,
        tx_hash: TxHash,
    },
    #[serde(rename = "emergency_stop")]
    EmergencyStop {
        vault: String,
        stopped: bool,
        tx_hash: TxHash,
    },
    #[serde(rename = "agent_trade")]
    AgentTrade {
        vault: String,
        amount: u64,
        tx_hash: TxHash,
    },
    #[serde(rename = "error")]
    Error {
        operation: String,
        kind: String,
        message: String,
    },
}
