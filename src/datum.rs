//! Plutus data in the ledger's detailed JSON schema, and the mappings between
//! it and the vault record / redeemer types.
//!
//! Vault record layout: constructor 0 with nine fields, in declaration order.
//! Booleans follow the Plutus convention (`False` = constructor 0,
//! `True` = constructor 1). Redeemers use their variant index as constructor.

use crate::errors::{Result, VaultServiceError};
use crate::models::{Redeemer, VaultRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PlutusData {
    Constr {
        constructor: u64,
        fields: Vec<PlutusData>,
    },
    Map {
        map: Vec<PlutusPair>,
    },
    List {
        list: Vec<PlutusData>,
    },
    Int {
        int: i64,
    },
    Bytes {
        bytes: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlutusPair {
    pub k: PlutusData,
    pub v: PlutusData,
}

const VAULT_RECORD_FIELDS: usize = 9;

impl PlutusData {
    pub fn constr(constructor: u64, fields: Vec<PlutusData>) -> Self {
        PlutusData::Constr {
            constructor,
            fields,
        }
    }

    pub fn int(value: u64) -> Result<Self> {
        let int = i64::try_from(value).map_err(|_| {
            VaultServiceError::validation(format!("integer {} does not fit plutus data", value))
        })?;
        Ok(PlutusData::Int { int })
    }

    pub fn bool(value: bool) -> Self {
        PlutusData::constr(u64::from(value), Vec::new())
    }

    fn as_u64(&self, field: &str) -> Result<u64> {
        match self {
            PlutusData::Int { int } if *int >= 0 => Ok(*int as u64),
            other => Err(malformed(field, other)),
        }
    }

    fn as_u32(&self, field: &str) -> Result<u32> {
        u32::try_from(self.as_u64(field)?).map_err(|_| malformed(field, self))
    }

    fn as_bool(&self, field: &str) -> Result<bool> {
        match self {
            PlutusData::Constr {
                constructor,
                fields,
            } if fields.is_empty() && *constructor <= 1 => Ok(*constructor == 1),
            other => Err(malformed(field, other)),
        }
    }

    fn as_bytes(&self, field: &str) -> Result<String> {
        match self {
            PlutusData::Bytes { bytes } => {
                hex::decode(bytes)?;
                Ok(bytes.to_lowercase())
            }
            other => Err(malformed(field, other)),
        }
    }
}

fn malformed(field: &str, value: &PlutusData) -> VaultServiceError {
    VaultServiceError::validation(format!(
        "vault datum field `{}` is malformed: {:?}",
        field, value
    ))
}

impl TryFrom<&PlutusData> for VaultRecord {
    type Error = VaultServiceError;

    fn try_from(data: &PlutusData) -> Result<Self> {
        let fields = match data {
            PlutusData::Constr {
                constructor: 0,
                fields,
            } if fields.len() == VAULT_RECORD_FIELDS => fields,
            other => {
                return Err(VaultServiceError::validation(format!(
                    "datum is not a vault record: {:?}",
                    other
                )))
            }
        };

        Ok(VaultRecord {
            owner: fields[0].as_bytes("owner")?,
            balance_lovelace: fields[1].as_u64("balance_lovelace")?,
            agent_authorized: fields[2].as_bool("agent_authorized")?,
            emergency_stop: fields[3].as_bool("emergency_stop")?,
            max_trade_amount_lovelace: fields[4].as_u64("max_trade_amount_lovelace")?,
            leverage_limit: fields[5].as_u32("leverage_limit")?,
            trade_count: fields[6].as_u32("trade_count")?,
            last_trade_at_millis: fields[7].as_u64("last_trade_at_millis")?,
            created_at_millis: fields[8].as_u64("created_at_millis")?,
        })
    }
}

impl TryFrom<&VaultRecord> for PlutusData {
    type Error = VaultServiceError;

    fn try_from(record: &VaultRecord) -> Result<Self> {
        Ok(PlutusData::constr(
            0,
            vec![
                PlutusData::Bytes {
                    bytes: record.owner.clone(),
                },
                PlutusData::int(record.balance_lovelace)?,
                PlutusData::bool(record.agent_authorized),
                PlutusData::bool(record.emergency_stop),
                PlutusData::int(record.max_trade_amount_lovelace)?,
                PlutusData::int(u64::from(record.leverage_limit))?,
                PlutusData::int(u64::from(record.trade_count))?,
                PlutusData::int(record.last_trade_at_millis)?,
                PlutusData::int(record.created_at_millis)?,
            ],
        ))
    }
}

impl TryFrom<&Redeemer> for PlutusData {
    type Error = VaultServiceError;

    fn try_from(redeemer: &Redeemer) -> Result<Self> {
        Ok(match redeemer {
            Redeemer::UserDeposit => PlutusData::constr(0, Vec::new()),
            Redeemer::UserWithdraw(amount) => PlutusData::constr(1, vec![PlutusData::int(*amount)?]),
            Redeemer::AgentTrade(amount) => PlutusData::constr(2, vec![PlutusData::int(*amount)?]),
            Redeemer::EmergencyStop => PlutusData::constr(3, Vec::new()),
            Redeemer::ResumeTrading => PlutusData::constr(4, Vec::new()),
            Redeemer::UpdateSettings => PlutusData::constr(5, Vec::new()),
        })
    }
}
