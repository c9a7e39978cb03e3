use crate::config::PolicyConfig;
use crate::errors::{Result, VaultServiceError};
use crate::models::{ada_to_lovelace, lovelace_to_ada, VaultSnapshot};
use crate::state_machine::VaultPhase;
use rust_decimal::Decimal;

/// Hex length of a 28-byte payment key hash.
const KEY_HASH_HEX_LEN: usize = 56;

/// Business rules for a withdrawal request against the current snapshot.
/// Pure: no I/O, first failing check wins.
pub struct WithdrawalValidator<'a> {
    policy: &'a PolicyConfig,
}

impl<'a> WithdrawalValidator<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self { policy }
    }

    /// Returns the requested amount in lovelace when every check passes.
    pub fn validate(&self, requested_ada: Decimal, snapshot: &VaultSnapshot) -> Result<u64> {
        let requested = self.check_amount(requested_ada)?;
        let available = snapshot.total_locked_lovelace();

        if requested > available {
            return Err(VaultServiceError::validation(format!(
                "Requested {} ADA exceeds available balance of {} ADA",
                requested_ada,
                lovelace_to_ada(available)
            )));
        }

        let remainder = available - requested;
        if remainder > 0 && remainder < self.policy.dust_threshold {
            return Err(VaultServiceError::validation(format!(
                "Withdrawal would leave {} ADA in the vault; leave at least {} ADA or withdraw all {} ADA",
                lovelace_to_ada(remainder),
                lovelace_to_ada(self.policy.dust_threshold),
                lovelace_to_ada(available)
            )));
        }

        if snapshot.phase() == Some(VaultPhase::EmergencyStopped) {
            return Err(VaultServiceError::validation(
                "Vault is emergency-stopped; withdrawals are blocked until trading resumes",
            ));
        }

        for locked in &snapshot.outputs {
            check_key_hash(&locked.record.owner)?;
        }

        Ok(requested)
    }

    /// Amount-only checks, shared with agent trades.
    pub fn check_amount(&self, requested_ada: Decimal) -> Result<u64> {
        if requested_ada <= Decimal::ZERO {
            return Err(VaultServiceError::validation(format!(
                "Amount must be a positive number, got {}",
                requested_ada
            )));
        }

        let requested = ada_to_lovelace(requested_ada).ok_or_else(|| {
            VaultServiceError::validation(format!(
                "Amount {} ADA is not representable in lovelace",
                requested_ada
            ))
        })?;

        if requested < self.policy.min_withdrawal {
            return Err(VaultServiceError::validation(format!(
                "Minimum withdrawal is {} ADA",
                lovelace_to_ada(self.policy.min_withdrawal)
            )));
        }

        if requested > self.policy.max_withdrawal {
            return Err(VaultServiceError::validation(format!(
                "Maximum single withdrawal is {} ADA; split larger amounts",
                lovelace_to_ada(self.policy.max_withdrawal)
            )));
        }

        Ok(requested)
    }
}

pub fn check_key_hash(key_hash: &str) -> Result<()> {
    let well_formed = key_hash.len() == KEY_HASH_HEX_LEN
        && key_hash.chars().all(|c| c.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(VaultServiceError::validation(format!(
            "Vault owner `{}` is not a valid key hash; the record may be uninitialized",
            key_hash
        )))
    }
}
