use crate::errors::{Result, VaultServiceError};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

pub const LOVELACE_PER_ADA: u64 = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub signer: SignerConfig,
    pub vault: VaultScriptConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub api_url: String,
    pub project_id: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub bridge_url: String,
    pub combiner_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultScriptConfig {
    pub script_address: String,
    pub script_cbor: String,
    pub network_id: u8,
    pub agent_key_hash: Option<String>,
    pub trading_venue_address: Option<String>,
}

/// Safety thresholds and fee parameters. Amounts are in lovelace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    pub min_withdrawal: u64,
    pub max_withdrawal: u64,
    pub dust_threshold: u64,
    pub fee_reserve: u64,
    pub max_fee_inputs: usize,
    pub full_withdrawal_tolerance: u64,
    pub change_buffer: u64,
    pub min_change: u64,
    pub min_fee_a: u64,
    pub min_fee_b: u64,
    pub script_fee_per_input: u64,
    pub witness_size_estimate: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_withdrawal: LOVELACE_PER_ADA,
            max_withdrawal: 1_000 * LOVELACE_PER_ADA,
            dust_threshold: 2 * LOVELACE_PER_ADA,
            fee_reserve: 5 * LOVELACE_PER_ADA,
            max_fee_inputs: 5,
            full_withdrawal_tolerance: LOVELACE_PER_ADA,
            change_buffer: 0,
            min_change: LOVELACE_PER_ADA,
            min_fee_a: 44,
            min_fee_b: 155_381,
            script_fee_per_input: 400_000,
            witness_size_estimate: 160,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = PolicyConfig::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            ledger: LedgerConfig {
                api_url: env::var("LEDGER_API_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/api/v0".to_string()),
                project_id: env::var("LEDGER_PROJECT_ID").unwrap_or_default(),
                timeout_secs: parse_var("LEDGER_TIMEOUT_SECS", 30)?,
            },
            signer: SignerConfig {
                bridge_url: env::var("SIGNER_BRIDGE_URL")
                    .unwrap_or_else(|_| "http://localhost:4100".to_string()),
                combiner_url: env::var("COMBINER_URL")
                    .unwrap_or_else(|_| "http://localhost:4200".to_string()),
            },
            vault: VaultScriptConfig {
                script_address: required_var("VAULT_SCRIPT_ADDRESS")?,
                script_cbor: required_var("VAULT_SCRIPT_CBOR")?,
                network_id: parse_var("NETWORK_ID", 0)?,
                agent_key_hash: env::var("AGENT_KEY_HASH").ok(),
                trading_venue_address: env::var("TRADING_VENUE_ADDRESS").ok(),
            },
            policy: PolicyConfig {
                min_withdrawal: parse_ada("MIN_WITHDRAWAL_ADA", defaults.min_withdrawal)?,
                max_withdrawal: parse_ada("MAX_WITHDRAWAL_ADA", defaults.max_withdrawal)?,
                dust_threshold: parse_ada("DUST_THRESHOLD_ADA", defaults.dust_threshold)?,
                fee_reserve: parse_ada("FEE_RESERVE_ADA", defaults.fee_reserve)?,
                max_fee_inputs: parse_var("MAX_FEE_INPUTS", defaults.max_fee_inputs)?,
                full_withdrawal_tolerance: parse_ada(
                    "FULL_WITHDRAWAL_TOLERANCE_ADA",
                    defaults.full_withdrawal_tolerance,
                )?,
                change_buffer: parse_var("CHANGE_BUFFER_LOVELACE", defaults.change_buffer)?,
                min_change: parse_var("MIN_CHANGE_LOVELACE", defaults.min_change)?,
                min_fee_a: parse_var("MIN_FEE_A", defaults.min_fee_a)?,
                min_fee_b: parse_var("MIN_FEE_B", defaults.min_fee_b)?,
                script_fee_per_input: parse_var(
                    "SCRIPT_FEE_PER_INPUT",
                    defaults.script_fee_per_input,
                )?,
                witness_size_estimate: parse_var(
                    "WITNESS_SIZE_ESTIMATE",
                    defaults.witness_size_estimate,
                )?,
            },
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| VaultServiceError::Config(format!("{} must be set", name)))
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| VaultServiceError::Config(format!("{} is not a valid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Whole-ADA variable converted to lovelace.
fn parse_ada(name: &str, default_lovelace: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => {
            let ada: u64 = raw.trim().parse().map_err(|_| {
                VaultServiceError::Config(format!("{} is not a whole ADA amount: {}", name, raw))
            })?;
            ada.checked_mul(LOVELACE_PER_ADA)
                .ok_or_else(|| VaultServiceError::Config(format!("{} overflows", name)))
        }
        Err(_) => Ok(default_lovelace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_thresholds() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.min_withdrawal, 1_000_000);
        assert_eq!(policy.max_withdrawal, 1_000_000_000);
        assert_eq!(policy.dust_threshold, 2_000_000);
        assert_eq!(policy.fee_reserve, 5_000_000);
        assert_eq!(policy.max_fee_inputs, 5);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("VAULT_TEST_BAD_PORT", "eighty");
        let result: Result<u16> = parse_var("VAULT_TEST_BAD_PORT", 8080);
        assert!(matches!(result, Err(VaultServiceError::Config(_))));
        env::remove_var("VAULT_TEST_BAD_PORT");
    }

    #[test]
    fn test_parse_ada_converts_to_lovelace() {
        env::set_var("VAULT_TEST_DUST_ADA", "3");
        assert_eq!(parse_ada("VAULT_TEST_DUST_ADA", 0).unwrap(), 3_000_000);
        env::remove_var("VAULT_TEST_DUST_ADA");
        assert_eq!(parse_ada("VAULT_TEST_DUST_ADA", 7).unwrap(), 7);
    }
}
