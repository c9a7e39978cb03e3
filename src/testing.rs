//! Fixtures and in-memory collaborators shared by the unit tests.

use crate::config::{Config, LedgerConfig, PolicyConfig, ServerConfig, SignerConfig, VaultScriptConfig};
use crate::datum::PlutusData;
use crate::errors::Result;
use crate::ledger::{LedgerQuery, SubmitRejection};
use crate::models::*;
use crate::selector::{select_fee_inputs, select_vault_inputs};
use crate::signer::{ExternalSigner, SignerCapabilities, SignerError, WitnessCombiner};
use crate::transaction::{SignedTransaction, Transaction, UnsignedTransaction, VkeyWitness, WitnessSet};
use crate::transaction_builder::TransactionBuilder;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub const VAULT_ADDRESS: &str = "addr_test1wzvaultscript";
pub const REQUESTER: &str = "addr_test1qrequester";
pub const VENUE_ADDRESS: &str = "addr_test1qvenue";

const VAULT_TX: &str = "aa";
const WALLET_TX: &str = "bb";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        ledger: LedgerConfig {
            api_url: "http://localhost:3000/api/v0".to_string(),
            project_id: "test".to_string(),
            timeout_secs: 5,
        },
        signer: SignerConfig {
            bridge_url: "http://localhost:4100".to_string(),
            combiner_url: "http://localhost:4200".to_string(),
        },
        vault: VaultScriptConfig {
            script_address: VAULT_ADDRESS.to_string(),
            script_cbor: "4e4d01000033222220051200120011".to_string(),
            network_id: 0,
            agent_key_hash: Some("cd".repeat(28)),
            trading_venue_address: Some(VENUE_ADDRESS.to_string()),
        },
        policy: PolicyConfig::default(),
    }
}

pub fn record(ada: u64) -> VaultRecord {
    VaultRecord {
        owner: "ab".repeat(28),
        balance_lovelace: ada * 1_000_000,
        agent_authorized: false,
        emergency_stop: false,
        max_trade_amount_lovelace: 0,
        leverage_limit: 1,
        trade_count: 0,
        last_trade_at_millis: 0,
        created_at_millis: 1_700_000_000_000,
    }
}

pub fn locked(ada: u64, index: u32, record: VaultRecord) -> LockedOutput {
    let datum = PlutusData::try_from(&record).unwrap();
    LockedOutput {
        utxo: UnspentOutput {
            tx_hash: VAULT_TX.repeat(32),
            output_index: index,
            address: VAULT_ADDRESS.to_string(),
            amount: Assets::from([(LOVELACE.to_string(), ada * 1_000_000)]),
            has_datum: true,
            inline_datum: Some(datum),
        },
        record,
    }
}

pub fn locked_ada(ada: u64, index: u32) -> LockedOutput {
    locked(ada, index, record(ada))
}

pub fn snapshot_of(amounts: &[u64]) -> VaultSnapshot {
    VaultSnapshot {
        address: VAULT_ADDRESS.to_string(),
        outputs: amounts
            .iter()
            .enumerate()
            .map(|(i, ada)| locked_ada(*ada, i as u32))
            .collect(),
    }
}

pub fn wallet_utxo(lovelace: u64, index: u32, has_datum: bool, tokens: bool) -> UnspentOutput {
    let mut amount = Assets::from([(LOVELACE.to_string(), lovelace)]);
    if tokens {
        amount.insert(format!("{}.746f6b656e", "ef".repeat(28)), 25);
    }
    UnspentOutput {
        tx_hash: WALLET_TX.repeat(32),
        output_index: index,
        address: REQUESTER.to_string(),
        amount,
        has_datum,
        inline_datum: has_datum.then(|| PlutusData::Int { int: 7 }),
    }
}

/// A 10 ADA withdrawal from a 100 ADA vault.
pub fn sample_unsigned() -> UnsignedTransaction {
    let config = test_config();
    let selection = select_vault_inputs(&[locked_ada(100, 0)], 10_000_000, &config.policy).unwrap();
    let fees = select_fee_inputs(&[wallet_utxo(9_000_000, 0, false, false)], &config.policy).unwrap();
    let builder = TransactionBuilder::new(Arc::new(config));
    let plan = builder
        .plan_withdrawal(&selection, &fees, 10_000_000, REQUESTER)
        .unwrap();
    builder.assemble(&plan).unwrap()
}

pub fn signed_sample() -> SignedTransaction {
    let unsigned = sample_unsigned();
    let mut tx = unsigned.tx.clone();
    tx.witness_set.vkey_witnesses.push(test_witness());
    SignedTransaction::verify(tx.to_bytes().unwrap(), &unsigned).unwrap()
}

fn test_witness() -> VkeyWitness {
    VkeyWitness {
        vkey: "ee".repeat(32),
        signature: "ff".repeat(64),
    }
}

fn failed(e: impl std::fmt::Display) -> SignerError {
    SignerError::Failed(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerMode {
    /// Returns the whole transaction with a key witness attached.
    FullTransaction,
    /// Returns only a detached witness set.
    WitnessOnly,
    Declines,
    /// Returns a witnessed transaction whose fee was changed.
    Tampers,
}

pub struct FakeSigner {
    mode: SignerMode,
    pub capabilities: SignerCapabilities,
    pub submit_error: Option<SubmitRejection>,
    sign_requests: Mutex<Vec<bool>>,
    presented: Mutex<Vec<Transaction>>,
}

impl FakeSigner {
    pub fn new(mode: SignerMode) -> Self {
        Self {
            mode,
            capabilities: SignerCapabilities::default(),
            submit_error: None,
            sign_requests: Mutex::new(Vec::new()),
            presented: Mutex::new(Vec::new()),
        }
    }

    /// The `want_full_sign` flag of every signing request, in order.
    pub fn sign_requests(&self) -> Vec<bool> {
        self.sign_requests.lock().unwrap().clone()
    }

    /// Every transaction presented for signing, as received.
    pub fn presented(&self) -> Vec<Transaction> {
        self.presented.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalSigner for FakeSigner {
    async fn capabilities(&self) -> SignerCapabilities {
        self.capabilities.clone()
    }

    async fn sign_transaction(
        &self,
        tx_hex: &str,
        want_full_sign: bool,
    ) -> std::result::Result<String, SignerError> {
        self.sign_requests.lock().unwrap().push(want_full_sign);
        let mut tx = Transaction::from_hex(tx_hex).map_err(failed)?;
        self.presented.lock().unwrap().push(tx.clone());

        match self.mode {
            SignerMode::Declines => Err(SignerError::Declined("user rejected".to_string())),
            SignerMode::WitnessOnly => {
                let witness = WitnessSet {
                    vkey_witnesses: vec![test_witness()],
                    ..WitnessSet::default()
                };
                Ok(hex::encode(serde_json::to_vec(&witness).map_err(failed)?))
            }
            SignerMode::FullTransaction => {
                tx.witness_set.vkey_witnesses.push(test_witness());
                tx.to_hex().map_err(failed)
            }
            SignerMode::Tampers => {
                tx.body.fee += 1;
                tx.witness_set.vkey_witnesses.push(test_witness());
                tx.to_hex().map_err(failed)
            }
        }
    }

    async fn submit_transaction(&self, tx_hex: &str) -> std::result::Result<TxHash, SubmitRejection> {
        if let Some(rejection) = &self.submit_error {
            return Err(rejection.clone());
        }
        Transaction::from_hex(tx_hex)
            .and_then(|tx| tx.id())
            .map_err(|e| SubmitRejection::Failed(e.to_string()))
    }

    async fn get_used_addresses(&self) -> std::result::Result<Vec<String>, SignerError> {
        Ok(vec![REQUESTER.to_string()])
    }
}

/// Merges the key witnesses of a detached witness set.
#[derive(Default)]
pub struct FakeCombiner {
    calls: Mutex<usize>,
}

impl FakeCombiner {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl WitnessCombiner for FakeCombiner {
    async fn combine(
        &self,
        unsigned_hex: &str,
        witness_hex: &str,
    ) -> std::result::Result<String, SignerError> {
        *self.calls.lock().unwrap() += 1;
        let mut tx = Transaction::from_hex(unsigned_hex).map_err(failed)?;
        let witness_bytes = hex::decode(witness_hex).map_err(failed)?;
        let witness: WitnessSet = serde_json::from_slice(&witness_bytes).map_err(failed)?;
        tx.witness_set.vkey_witnesses.extend(witness.vkey_witnesses);
        tx.to_hex().map_err(failed)
    }
}

/// In-memory ledger. Serves outputs by address and remembers submitted ids.
#[derive(Default)]
pub struct FakeLedger {
    pub outputs: Vec<UnspentOutput>,
    pub submit_error: Option<SubmitRejection>,
    pub submitted: Mutex<HashSet<TxHash>>,
    pub submissions: Mutex<usize>,
}

impl FakeLedger {
    pub fn with_outputs(outputs: Vec<UnspentOutput>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    /// Number of submission attempts received.
    pub fn submissions(&self) -> usize {
        *self.submissions.lock().unwrap()
    }
}

#[async_trait]
impl LedgerQuery for FakeLedger {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        Ok(self
            .outputs
            .iter()
            .filter(|utxo| utxo.address == address)
            .cloned()
            .collect())
    }

    async fn submit_transaction(&self, tx: &[u8]) -> std::result::Result<TxHash, SubmitRejection> {
        *self.submissions.lock().unwrap() += 1;
        if let Some(rejection) = &self.submit_error {
            return Err(rejection.clone());
        }
        let tx_id = Transaction::from_bytes(tx)
            .and_then(|tx| tx.id())
            .map_err(|e| SubmitRejection::Failed(e.to_string()))?;
        if !self.submitted.lock().unwrap().insert(tx_id.clone()) {
            return Err(SubmitRejection::AlreadySubmitted);
        }
        Ok(tx_id)
    }
}
