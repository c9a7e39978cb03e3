//! Input selection.
//!
//! Vault side: largest-first, so the withdrawal is covered with as few script
//! inputs as possible. A request within the full-withdrawal tolerance of the
//! vault total drains every locked output instead.
//!
//! Fee side: smallest-first over datum-free wallet outputs, preferring pure
//! ADA, until the fee/collateral reserve is met or the input cap is hit.
//!
//! Candidate order is deterministic: amount, then `tx_hash#index` ascending.

use crate::config::PolicyConfig;
use crate::errors::{Result, VaultServiceError};
use crate::models::{LockedOutput, UnspentOutput};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct VaultSelection {
    pub inputs: Vec<LockedOutput>,
    pub full_withdrawal: bool,
}

impl VaultSelection {
    pub fn total_lovelace(&self) -> u64 {
        self.inputs.iter().map(|o| o.utxo.lovelace()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct FeeSelection {
    pub inputs: Vec<UnspentOutput>,
    /// False when the input cap was reached before the reserve was covered.
    pub covers_reserve: bool,
    pub carries_tokens: bool,
}

impl FeeSelection {
    pub fn total_lovelace(&self) -> u64 {
        self.inputs.iter().map(UnspentOutput::lovelace).sum()
    }
}

fn by_amount_then_ref(a: &UnspentOutput, b: &UnspentOutput) -> Ordering {
    a.lovelace()
        .cmp(&b.lovelace())
        .then_with(|| a.tx_hash.cmp(&b.tx_hash))
        .then_with(|| a.output_index.cmp(&b.output_index))
}

pub fn select_vault_inputs(
    locked: &[LockedOutput],
    requested: u64,
    policy: &PolicyConfig,
) -> Result<VaultSelection> {
    let total: u64 = locked.iter().map(|o| o.utxo.lovelace()).sum();
    if total < requested {
        return Err(VaultServiceError::InsufficientFunds {
            available: total,
            required: requested,
            context: "vault outputs".to_string(),
        });
    }

    let mut candidates = locked.to_vec();
    candidates.sort_by(|a, b| {
        b.utxo
            .lovelace()
            .cmp(&a.utxo.lovelace())
            .then_with(|| by_amount_then_ref(&a.utxo, &b.utxo))
    });

    if total - requested < policy.full_withdrawal_tolerance {
        log::info!(
            "Full withdrawal: consuming all {} vault outputs ({} lovelace)",
            candidates.len(),
            total
        );
        return Ok(VaultSelection {
            inputs: candidates,
            full_withdrawal: true,
        });
    }

    let mut selected = Vec::new();
    let mut covered = 0u64;
    let mut remaining = candidates.into_iter();

    for candidate in remaining.by_ref() {
        covered += candidate.utxo.lovelace();
        selected.push(candidate);
        if covered >= requested {
            break;
        }
    }

    // A remainder under the dust threshold cannot go back to the vault as its
    // own output, so keep pulling outputs until it is large enough.
    while covered > requested && covered - requested < policy.dust_threshold {
        match remaining.next() {
            Some(candidate) => {
                covered += candidate.utxo.lovelace();
                selected.push(candidate);
            }
            None => break,
        }
    }

    log::debug!(
        "Selected {} vault outputs covering {} of {} lovelace",
        selected.len(),
        covered,
        requested
    );

    Ok(VaultSelection {
        inputs: selected,
        full_withdrawal: false,
    })
}

pub fn select_fee_inputs(personal: &[UnspentOutput], policy: &PolicyConfig) -> Result<FeeSelection> {
    let datum_free: Vec<&UnspentOutput> = personal.iter().filter(|u| !u.carries_datum()).collect();
    let pure: Vec<&UnspentOutput> = datum_free.iter().copied().filter(|u| u.is_pure_ada()).collect();

    let mut candidates = if pure.is_empty() {
        if !datum_free.is_empty() {
            log::warn!(
                "No pure-ADA wallet outputs; falling back to token-bearing outputs. \
                 Their tokens will be carried into the wallet change output"
            );
        }
        datum_free
    } else {
        pure
    };

    if candidates.is_empty() {
        return Err(VaultServiceError::InsufficientFunds {
            available: 0,
            required: policy.fee_reserve,
            context: "no datum-free wallet outputs for fee and collateral".to_string(),
        });
    }

    candidates.sort_by(|a, b| by_amount_then_ref(a, b));

    let mut inputs = Vec::new();
    let mut covered = 0u64;
    for candidate in candidates {
        if covered >= policy.fee_reserve || inputs.len() >= policy.max_fee_inputs {
            break;
        }
        covered += candidate.lovelace();
        inputs.push(candidate.clone());
    }

    let covers_reserve = covered >= policy.fee_reserve;
    if !covers_reserve {
        log::warn!(
            "Fee input cap of {} reached with {} of {} lovelace reserved",
            policy.max_fee_inputs,
            covered,
            policy.fee_reserve
        );
    }

    let carries_tokens = inputs.iter().any(|u| !u.is_pure_ada());

    Ok(FeeSelection {
        inputs,
        covers_reserve,
        carries_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOVELACE;
    use crate::testing::{locked_ada, wallet_utxo};
    use proptest::prelude::*;

    #[test]
    fn test_picks_single_largest_sufficient_output() {
        let locked = vec![locked_ada(30, 0), locked_ada(70, 1)];
        let selection = select_vault_inputs(&locked, 40_000_000, &PolicyConfig::default()).unwrap();
        assert!(!selection.full_withdrawal);
        assert_eq!(selection.inputs.len(), 1);
        assert_eq!(selection.total_lovelace(), 70_000_000);
    }

    #[test]
    fn test_combines_outputs_largest_first() {
        let locked = vec![locked_ada(30, 0), locked_ada(70, 1), locked_ada(20, 2)];
        let selection = select_vault_inputs(&locked, 90_000_000, &PolicyConfig::default()).unwrap();
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.inputs[0].utxo.lovelace(), 70_000_000);
        assert_eq!(selection.inputs[1].utxo.lovelace(), 30_000_000);
    }

    #[test]
    fn test_full_withdrawal_takes_everything() {
        let locked = vec![locked_ada(30, 0), locked_ada(70, 1)];
        let selection = select_vault_inputs(&locked, 100_000_000, &PolicyConfig::default()).unwrap();
        assert!(selection.full_withdrawal);
        assert_eq!(selection.inputs.len(), 2);

        let near = select_vault_inputs(&locked, 99_500_000, &PolicyConfig::default()).unwrap();
        assert!(near.full_withdrawal);
    }

    #[test]
    fn test_extends_selection_past_dust_remainder() {
        let locked = vec![locked_ada(70, 0), locked_ada(30, 1)];
        let selection = select_vault_inputs(&locked, 69_000_000, &PolicyConfig::default()).unwrap();
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.total_lovelace() - 69_000_000, 31_000_000);
    }

    #[test]
    fn test_insufficient_vault_funds() {
        let locked = vec![locked_ada(30, 0)];
        let err = select_vault_inputs(&locked, 40_000_000, &PolicyConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_fee_inputs_smallest_first_until_reserve() {
        let wallet = vec![
            wallet_utxo(50_000_000, 0, false, false),
            wallet_utxo(2_000_000, 1, false, false),
            wallet_utxo(3_500_000, 2, false, false),
        ];
        let selection = select_fee_inputs(&wallet, &PolicyConfig::default()).unwrap();
        assert!(selection.covers_reserve);
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.total_lovelace(), 5_500_000);
        assert_eq!(selection.inputs[0].lovelace(), 2_000_000);
    }

    #[test]
    fn test_fee_inputs_skip_datum_and_prefer_pure_ada() {
        let wallet = vec![
            wallet_utxo(1_000_000, 0, true, false),
            wallet_utxo(1_500_000, 1, false, true),
            wallet_utxo(9_000_000, 2, false, false),
        ];
        let selection = select_fee_inputs(&wallet, &PolicyConfig::default()).unwrap();
        assert_eq!(selection.inputs.len(), 1);
        assert_eq!(selection.inputs[0].output_index, 2);
        assert!(!selection.carries_tokens);
    }

    #[test]
    fn test_fee_inputs_fall_back_to_token_outputs() {
        let wallet = vec![
            wallet_utxo(8_000_000, 0, true, false),
            wallet_utxo(6_000_000, 1, false, true),
        ];
        let selection = select_fee_inputs(&wallet, &PolicyConfig::default()).unwrap();
        assert_eq!(selection.inputs.len(), 1);
        assert_eq!(selection.inputs[0].output_index, 1);
        assert!(selection.carries_tokens);
        assert!(selection.inputs[0].amount.keys().any(|k| k != LOVELACE));
    }

    #[test]
    fn test_fee_inputs_cap_returns_partial_set() {
        let wallet: Vec<_> = (0..8).map(|i| wallet_utxo(500_000, i, false, false)).collect();
        let selection = select_fee_inputs(&wallet, &PolicyConfig::default()).unwrap();
        assert_eq!(selection.inputs.len(), 5);
        assert!(!selection.covers_reserve);
        assert_eq!(selection.total_lovelace(), 2_500_000);
    }

    #[test]
    fn test_fee_inputs_none_usable() {
        let wallet = vec![wallet_utxo(10_000_000, 0, true, false)];
        let err = select_fee_inputs(&wallet, &PolicyConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");
    }

    proptest! {
        #[test]
        fn prop_fee_inputs_never_carry_datum(
            utxos in prop::collection::vec((1_000_000u64..20_000_000, any::<bool>(), any::<bool>()), 1..12)
        ) {
            let wallet: Vec<_> = utxos
                .iter()
                .enumerate()
                .map(|(i, (amount, datum, tokens))| wallet_utxo(*amount, i as u32, *datum, *tokens))
                .collect();
            if let Ok(selection) = select_fee_inputs(&wallet, &PolicyConfig::default()) {
                prop_assert!(selection.inputs.iter().all(|u| !u.carries_datum()));
                prop_assert!(selection.inputs.len() <= 5);
            }
        }

        #[test]
        fn prop_vault_selection_covers_request(
            amounts in prop::collection::vec(1u64..300, 1..6),
            pick in 0u64..1000
        ) {
            let locked: Vec<_> = amounts
                .iter()
                .enumerate()
                .map(|(i, ada)| locked_ada(*ada, i as u32))
                .collect();
            let total: u64 = amounts.iter().sum::<u64>() * 1_000_000;
            let requested = 1_000_000 + pick * (total - 1_000_000).min(999_000_000) / 1000;
            let selection = select_vault_inputs(&locked, requested, &PolicyConfig::default()).unwrap();
            let covered = selection.total_lovelace();
            prop_assert!(covered >= requested);
            if selection.full_withdrawal {
                prop_assert_eq!(selection.inputs.len(), locked.len());
            }
        }
    }
}
