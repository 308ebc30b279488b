//! Dry-run fee estimation
//!
//! Schnorr signatures have a fixed size regardless of message, so signing
//! a clone of the assembled transaction over its provisional digest (with
//! a zero-valued change output) yields the exact final virtual size
//! before the change amount is known — no fee/size fixed-point search.
//!
//! The dry run and the final build share one finalization path, so the
//! measured size equals the broadcast size by construction: only the
//! change amount and the signature payload bytes (same length) differ.

use bitcoin::Transaction;

use crate::{Error, Result};

/// Byte size of a Schnorr signature
pub const SCHNORR_SIGNATURE_SIZE: usize = 64;

/// Measure the signed virtual size of `template` without mutating it.
///
/// `finalize` must attach every witness the real transaction will carry;
/// it runs against a clone which is discarded after measurement.
pub fn signed_vsize<F>(template: &Transaction, finalize: F) -> Result<usize>
where
    F: FnOnce(&mut Transaction) -> Result<()>,
{
    let mut dry_run = template.clone();
    finalize(&mut dry_run)?;
    Ok(dry_run.vsize())
}

/// Fee in satoshis for a virtual size at the given sat/vB rate
pub fn fee_for(vsize: usize, fee_rate: u64) -> u64 {
    (vsize as u64).saturating_mul(fee_rate)
}

/// Final change value after fee and reserved output values.
///
/// Falling below the dust limit is a hard failure for this fee/amount
/// combination, not a retryable condition.
pub fn change_value(
    total_input: u64,
    vsize: usize,
    fee_rate: u64,
    reserved_outputs: u64,
    dust_limit: u64,
) -> Result<u64> {
    let fee = fee_for(vsize, fee_rate);
    let needed = fee
        .checked_add(reserved_outputs)
        .ok_or_else(|| Error::InsufficientFunds("fee plus outputs overflow".to_string()))?;
    let change = total_input.checked_sub(needed).ok_or_else(|| {
        Error::InsufficientFunds(format!("inputs {total_input} cannot cover {needed}"))
    })?;
    if change < dust_limit {
        return Err(Error::InsufficientFunds(format!(
            "change {change} below dust limit {dust_limit}"
        )));
    }
    Ok(change)
}
