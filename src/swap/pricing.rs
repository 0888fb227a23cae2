use serde::Serialize;

use crate::error::{Error, Result};

/// Anticipated size of a single-input claim transaction, in vbytes.
pub const ESTIMATED_CLAIM_VSIZE: u64 = 150;

/// Swap outputs must be worth at least this many claim fees.
pub const DUST_FACTOR: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapPrice {
    /// `send_tokens` expressed in destination-chain tokens.
    pub converted_tokens: u64,
    pub fee: u64,
    pub total_tokens: u64,
    /// `fee` expressed in source-chain tokens.
    pub converted_fee: u64,
}

/// Prices a swap of `send_tokens` source tokens.
///
/// The fee covers `base_rate`, the anticipated claim fee at
/// `fee_tokens_per_vbyte`, and `swap_rate_ppm` of the converted amount. It is
/// raised to [`DUST_FACTOR`] claim fees when the swap output would otherwise
/// be too small to claim economically.
pub fn price_swap(
    base_rate: u64,
    fee_tokens_per_vbyte: u64,
    rate_source: f64,
    rate_destination: f64,
    send_tokens: u64,
    swap_rate_ppm: u64,
) -> Result<SwapPrice> {
    if fee_tokens_per_vbyte == 0 {
        return Err(Error::invalid_input("fee_tokens_per_vbyte", "must be positive"));
    }
    require_rate("rate_source", rate_source)?;
    require_rate("rate_destination", rate_destination)?;
    if send_tokens == 0 {
        return Err(Error::invalid_input("send_tokens", "must be positive"));
    }

    let converted_tokens = to_tokens(
        "send_tokens",
        send_tokens as f64 * rate_destination / rate_source,
    )?;
    let claim_chain_fee = fee_tokens_per_vbyte
        .checked_mul(ESTIMATED_CLAIM_VSIZE)
        .ok_or_else(|| Error::invalid_input("fee_tokens_per_vbyte", "too large"))?;
    let percentage_fee = swap_rate_ppm as f64 / 1_000_000.0;

    let fee_candidate = to_tokens(
        "base_rate",
        base_rate as f64 + claim_chain_fee as f64 + converted_tokens as f64 * percentage_fee,
    )?;
    let dust_floor = claim_chain_fee
        .checked_mul(DUST_FACTOR)
        .ok_or_else(|| Error::invalid_input("fee_tokens_per_vbyte", "too large"))?;

    let fee = if converted_tokens.saturating_add(fee_candidate) < dust_floor {
        dust_floor
    } else {
        fee_candidate
    };

    let total_tokens = converted_tokens
        .checked_add(fee)
        .ok_or_else(|| Error::invalid_input("send_tokens", "too large"))?;
    let converted_fee = to_tokens("rate_destination", fee as f64 / (rate_destination / rate_source))?;

    Ok(SwapPrice {
        converted_tokens,
        fee,
        total_tokens,
        converted_fee,
    })
}

fn require_rate(field: &'static str, rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_input(field, format!("must be a positive number, got {rate}")))
    }
}

fn to_tokens(field: &'static str, value: f64) -> Result<u64> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 0.0 || rounded >= u64::MAX as f64 {
        return Err(Error::invalid_input(field, format!("amount {value} out of range")));
    }
    Ok(rounded as u64)
}
