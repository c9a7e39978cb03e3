//! Transaction envelope exchanged with the signer, combiner and ledger.
//!
//! The envelope is encoded canonically (struct field order, sorted maps) and
//! hex-encoded for transport. The transaction id is the SHA-256 of the
//! encoded body, so any change to the body after assembly is detectable.

use crate::datum::PlutusData;
use crate::errors::{Result, VaultServiceError};
use crate::models::{Assets, TxHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxInput {
    pub tx_hash: TxHash,
    pub output_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    pub address: String,
    pub amount: Assets,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_datum: Option<PlutusData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxBody {
    pub inputs: Vec<TxInput>,
    pub collateral: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub required_signers: Vec<String>,
    pub network_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VkeyWitness {
    pub vkey: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedeemerEntry {
    pub tag: String,
    pub index: u32,
    pub data: PlutusData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WitnessSet {
    #[serde(default)]
    pub vkey_witnesses: Vec<VkeyWitness>,
    #[serde(default)]
    pub plutus_scripts: Vec<String>,
    #[serde(default)]
    pub redeemers: Vec<RedeemerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub body: TxBody,
    pub witness_set: WitnessSet,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TxBody {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Transaction id: SHA-256 of the canonical body bytes.
    pub fn hash(&self) -> Result<TxHash> {
        Ok(hex::encode(Sha256::digest(self.to_bytes()?)))
    }
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(encoded.trim())?)
    }

    pub fn id(&self) -> Result<TxHash> {
        self.body.hash()
    }
}

pub fn metadata_hash(metadata: &serde_json::Value) -> Result<String> {
    Ok(hex::encode(Sha256::digest(serde_json::to_vec(metadata)?)))
}

/// An assembled transaction awaiting witnesses.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub bytes: Vec<u8>,
    pub tx_id: TxHash,
}

impl UnsignedTransaction {
    pub fn new(tx: Transaction) -> Result<Self> {
        let bytes = tx.to_bytes()?;
        let tx_id = tx.id()?;
        Ok(Self { tx, bytes, tx_id })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// A fully witnessed transaction whose body matches what was assembled.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub bytes: Vec<u8>,
    pub tx_id: TxHash,
}

impl SignedTransaction {
    /// Decodes `bytes` and checks that the body is the one that was assembled.
    pub fn verify(bytes: Vec<u8>, unsigned: &UnsignedTransaction) -> Result<Self> {
        let tx = Transaction::from_bytes(&bytes).map_err(|e| {
            VaultServiceError::Signing(format!("signed transaction does not decode: {}", e))
        })?;
        if tx.body != unsigned.tx.body {
            return Err(VaultServiceError::Signing(
                "signer altered the transaction body".to_string(),
            ));
        }
        if tx.witness_set.plutus_scripts != unsigned.tx.witness_set.plutus_scripts
            || tx.witness_set.redeemers != unsigned.tx.witness_set.redeemers
        {
            return Err(VaultServiceError::Signing(
                "signer altered scripts or redeemers".to_string(),
            ));
        }
        if tx.witness_set.vkey_witnesses.is_empty() {
            return Err(VaultServiceError::Signing(
                "signed transaction carries no key witnesses".to_string(),
            ));
        }
        Ok(Self {
            tx,
            bytes,
            tx_id: unsigned.tx_id.clone(),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}
