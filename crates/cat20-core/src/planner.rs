//! Supply split planning for open-minter mints
//!
//! A mint consumes one minter UTXO and re-emits the remaining mintable
//! supply across successor minter outputs. The planner decides the mint
//! amount and the successor shares; it is pure arithmetic and every
//! violated precondition is a fatal [`Error::Planning`]-family value,
//! never a panic.

use bitcoin::ScriptBuf;
use cat20_params::ScaledTokenInfo;
use serde::{Deserialize, Serialize};

use crate::state::MinterState;
use crate::{Error, Result};

/// The outcome of planning one mint attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintPlan {
    /// Amount minted to the receiver (atomic units)
    pub mint_amount: u128,
    /// Strictly positive successor minter shares, in emission order
    pub split_amounts: Vec<u128>,
    /// Successor minter states, one per share
    pub minter_states: Vec<MinterState>,
    /// Whether this mint consumes the premine allocation
    pub is_premine: bool,
}

impl MintPlan {
    /// Number of successor minter outputs the transaction will emit
    pub fn successor_count(&self) -> usize {
        self.split_amounts.len()
    }
}

/// Split the leftover supply across successor minters.
///
/// Shares are filled in per-mint-limit chunks: each successor takes
/// `min(limit, rest)` in order and zero shares are dropped, so every
/// returned share is in `(0, limit]` and the shares sum to `leftover`
/// exactly. A leftover that cannot fit into `successors` shares is a
/// planning error.
pub fn split_amounts(leftover: u128, limit: u128, successors: usize) -> Result<Vec<u128>> {
    if limit == 0 {
        return Err(Error::Planning("per-mint limit is zero".to_string()));
    }
    let capacity = limit
        .checked_mul(successors as u128)
        .ok_or_else(|| Error::Planning("successor capacity overflows".to_string()))?;
    if leftover > capacity {
        return Err(Error::Planning(format!(
            "leftover supply {leftover} does not fit into {successors} shares of at most {limit}"
        )));
    }

    let mut shares = Vec::with_capacity(successors);
    let mut rest = leftover;
    for _ in 0..successors {
        let share = limit.min(rest);
        if share == 0 {
            break;
        }
        shares.push(share);
        rest -= share;
    }
    debug_assert_eq!(rest, 0);
    Ok(shares)
}

/// Plan a mint against the given minter state.
///
/// `requested` of `None` defaults to the per-mint limit (or the premine on
/// the first mint of a premined token). The first mint of a premined token
/// must mint exactly the premine, and the premine is carried into the
/// supply fed to the splitter.
pub fn plan_mint(
    scaled: &ScaledTokenInfo,
    minter: &MinterState,
    token_script: &ScriptBuf,
    requested: Option<u128>,
    successors: usize,
) -> Result<MintPlan> {
    let is_premine = !minter.is_premined && scaled.premine > 0;

    let (mint_amount, supply) = if is_premine {
        let amount = requested.unwrap_or(scaled.premine);
        if amount != scaled.premine {
            return Err(Error::PremineMismatch {
                expected: scaled.premine,
                requested: amount,
            });
        }
        let supply = scaled
            .premine
            .checked_add(minter.remaining_supply)
            .ok_or_else(|| Error::Planning("supply overflows".to_string()))?;
        (amount, supply)
    } else {
        let amount = requested.unwrap_or(scaled.limit);
        if amount > scaled.limit {
            return Err(Error::LimitExceeded {
                limit: scaled.limit,
                requested: amount,
            });
        }
        (amount.min(minter.remaining_supply), minter.remaining_supply)
    };

    if mint_amount == 0 {
        return Err(Error::Planning("mint amount is zero".to_string()));
    }
    if mint_amount > supply {
        return Err(Error::Planning(format!(
            "mint amount {mint_amount} exceeds remaining supply {supply}"
        )));
    }

    let split = split_amounts(supply - mint_amount, scaled.limit, successors)?;

    let minter_states = split
        .iter()
        .map(|&share| MinterState {
            token_script: token_script.clone(),
            is_premined: true,
            remaining_supply: share,
        })
        .collect();

    tracing::debug!(
        mint_amount = %mint_amount,
        successors = split.len(),
        is_premine,
        "planned mint"
    );

    Ok(MintPlan {
        mint_amount,
        split_amounts: split,
        minter_states,
        is_premine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled(max: u128, premine: u128, limit: u128) -> ScaledTokenInfo {
        ScaledTokenInfo {
            decimals: 0,
            max,
            premine,
            limit,
        }
    }

    fn minter(is_premined: bool, remaining: u128) -> MinterState {
        MinterState {
            token_script: ScriptBuf::from_bytes(vec![0x51]),
            is_premined,
            remaining_supply: remaining,
        }
    }

    #[test]
    fn test_split_fills_limit_chunks() {
        // 700 leftover, limit 400, two successors: [400, 300].
        assert_eq!(split_amounts(700, 400, 2).unwrap(), vec![400, 300]);
    }

    #[test]
    fn test_split_drops_zero_shares() {
        assert_eq!(split_amounts(100, 400, 2).unwrap(), vec![100]);
        assert_eq!(split_amounts(0, 400, 2).unwrap(), Vec::<u128>::new());
    }

    #[test]
    fn test_split_exact_capacity() {
        assert_eq!(split_amounts(800, 400, 2).unwrap(), vec![400, 400]);
    }

    #[test]
    fn test_split_rejects_overflowing_leftover() {
        assert!(split_amounts(801, 400, 2).is_err());
    }

    #[test]
    fn test_split_rejects_zero_limit() {
        assert!(split_amounts(1, 0, 2).is_err());
    }

    #[test]
    fn test_plan_splits_leftover_in_limit_chunks() {
        // remaining 1000, mint 300, limit 400, two successors.
        let plan = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 1000),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(300),
            2,
        )
        .unwrap();
        assert_eq!(plan.split_amounts, vec![400, 300]);
        assert_eq!(plan.mint_amount, 300);
        assert_eq!(
            plan.split_amounts.iter().sum::<u128>() + plan.mint_amount,
            1000
        );
        assert!(!plan.is_premine);
    }

    #[test]
    fn test_plan_defaults_to_limit() {
        let plan = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 1000),
            &ScriptBuf::from_bytes(vec![0x51]),
            None,
            2,
        )
        .unwrap();
        assert_eq!(plan.mint_amount, 400);
        assert_eq!(plan.split_amounts, vec![400, 200]);
    }

    #[test]
    fn test_plan_clamps_to_remaining_supply() {
        let plan = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 250),
            &ScriptBuf::from_bytes(vec![0x51]),
            None,
            2,
        )
        .unwrap();
        assert_eq!(plan.mint_amount, 250);
        assert!(plan.split_amounts.is_empty());
    }

    #[test]
    fn test_plan_rejects_over_limit() {
        let err = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 1000),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(401),
            2,
        )
        .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { .. }));
    }

    #[test]
    fn test_plan_premine_exact_match() {
        // First mint of a premined token must mint exactly the premine.
        let plan = plan_mint(
            &scaled(1300, 500, 400),
            &minter(false, 300),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(500),
            2,
        )
        .unwrap();
        assert_eq!(plan.mint_amount, 500);
        assert!(plan.is_premine);
        // Premine carried forward: supply fed to the splitter is 500 + 300.
        assert_eq!(plan.split_amounts, vec![300]);
    }

    #[test]
    fn test_plan_premine_mismatch_is_fatal() {
        let err = plan_mint(
            &scaled(1300, 500, 400),
            &minter(false, 300),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(400),
            2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::PremineMismatch {
                expected: 500,
                requested: 400
            }
        ));
    }

    #[test]
    fn test_plan_premine_default_amount() {
        let plan = plan_mint(
            &scaled(1300, 500, 400),
            &minter(false, 300),
            &ScriptBuf::from_bytes(vec![0x51]),
            None,
            2,
        )
        .unwrap();
        assert_eq!(plan.mint_amount, 500);
    }

    #[test]
    fn test_plan_ignores_premine_after_first_mint() {
        // Once premined, premine accounting is ignored entirely.
        let plan = plan_mint(
            &scaled(1300, 500, 400),
            &minter(true, 700),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(300),
            2,
        )
        .unwrap();
        assert_eq!(plan.mint_amount, 300);
        assert_eq!(plan.split_amounts, vec![400]);
    }

    #[test]
    fn test_plan_zero_amount_rejected() {
        let err = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 1000),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(0),
            2,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn test_successor_states_carry_shares() {
        let plan = plan_mint(
            &scaled(1000, 0, 400),
            &minter(true, 1000),
            &ScriptBuf::from_bytes(vec![0x51]),
            Some(300),
            2,
        )
        .unwrap();
        assert_eq!(plan.minter_states.len(), 2);
        assert!(plan.minter_states.iter().all(|s| s.is_premined));
        assert_eq!(plan.minter_states[0].remaining_supply, 400);
        assert_eq!(plan.minter_states[1].remaining_supply, 300);
    }
}
