//! Swap Simulator
//!
//! Deterministic swap output for constant-product (x * y = k) pools and a
//! single-tick concentrated-liquidity approximation in Q64.64 fixed point.
//! All profit-relevant arithmetic is integer: fees are exact rationals and
//! intermediates are 256-bit so nothing rounds through floating point.
//!
//! Every function fails closed: degenerate input (zero reserves, zero
//! liquidity, zero amount, a result that does not fit in u128) yields an
//! output of 0, which callers treat as "no profitable path".
//!
//! Multi-tick crossing is not modelled. A concentrated-liquidity swap is
//! priced as if the whole input stays inside the current tick.

use crate::types::{CurveState, FeeRate, PoolSnapshot};
use alloy::primitives::U256;
use tracing::trace;

/// 2^64, the Q64.64 scale
const Q64_SHIFT: usize = 64;

/// Direction of a concentrated-liquidity swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Base (token0) in, quote (token1) out; price moves down
    BaseToQuote,
    /// Quote (token1) in, base (token0) out; price moves up
    QuoteToBase,
}

/// Which half of a round trip a swap belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Quote in, base out
    Buy,
    /// Base in, quote out
    Sell,
}

/// Stateless swap math
pub struct SwapSimulator;

impl SwapSimulator {
    /// Constant-product output.
    ///
    /// Formula: effective_in = amount_in * (den - num) / den,
    /// amount_out = reserve_out * effective_in / (reserve_in + effective_in)
    ///
    /// The output is always strictly below `reserve_out`.
    pub fn cpmm_amount_out(reserve_in: u128, reserve_out: u128, fee: FeeRate, amount_in: u128) -> u128 {
        if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
            return 0;
        }

        let effective_in = fee.apply(amount_in);
        if effective_in == 0 {
            return 0;
        }

        let effective_in = U256::from(effective_in);
        let numerator = U256::from(reserve_out) * effective_in;
        let denominator = U256::from(reserve_in) + effective_in;

        narrow(numerator / denominator)
    }

    /// Concentrated-liquidity output inside a single tick.
    ///
    /// BaseToQuote: new_sqrt = L*2^64 / (L*2^64/sqrt + dx), out = L*(sqrt - new_sqrt) / 2^64
    /// QuoteToBase: new_sqrt = sqrt + dy*2^64/L, out = L*(new_sqrt - sqrt) / (new_sqrt*sqrt / 2^64)
    pub fn clmm_amount_out(
        sqrt_price_q64: u128,
        liquidity: u128,
        fee: FeeRate,
        amount_in: u128,
        direction: SwapDirection,
    ) -> u128 {
        if amount_in == 0 || liquidity == 0 || sqrt_price_q64 == 0 {
            return 0;
        }

        let amount_after_fee = fee.apply(amount_in);
        if amount_after_fee == 0 {
            return 0;
        }

        let sqrt_price = U256::from(sqrt_price_q64);
        let liquidity = U256::from(liquidity);
        let amount = U256::from(amount_after_fee);
        let liquidity_q64 = liquidity << Q64_SHIFT;

        match direction {
            SwapDirection::BaseToQuote => {
                let denominator = liquidity_q64 / sqrt_price + amount;
                if denominator.is_zero() {
                    return 0;
                }
                let new_sqrt = liquidity_q64 / denominator;
                if new_sqrt >= sqrt_price {
                    return 0;
                }
                narrow((liquidity * (sqrt_price - new_sqrt)) >> Q64_SHIFT)
            }
            SwapDirection::QuoteToBase => {
                let new_sqrt = sqrt_price + (amount << Q64_SHIFT) / liquidity;
                if new_sqrt <= sqrt_price {
                    return 0;
                }
                let denominator = match new_sqrt.checked_mul(sqrt_price) {
                    Some(product) => product >> Q64_SHIFT,
                    None => return 0,
                };
                if denominator.is_zero() {
                    return 0;
                }
                match liquidity.checked_mul(new_sqrt - sqrt_price) {
                    Some(numerator) => narrow(numerator / denominator),
                    None => 0,
                }
            }
        }
    }

    /// Swap through a pool snapshot for one leg of a round trip
    pub fn swap(pool: &PoolSnapshot, leg: Leg, amount_in: u128) -> u128 {
        let fee = pool.meta.fee;
        match (pool.curve, leg) {
            (CurveState::ConstantProduct { reserve_base, reserve_quote }, Leg::Buy) => {
                Self::cpmm_amount_out(reserve_quote, reserve_base, fee, amount_in)
            }
            (CurveState::ConstantProduct { reserve_base, reserve_quote }, Leg::Sell) => {
                Self::cpmm_amount_out(reserve_base, reserve_quote, fee, amount_in)
            }
            (CurveState::ConcentratedLiquidity { sqrt_price_q64, liquidity }, Leg::Buy) => {
                Self::clmm_amount_out(sqrt_price_q64, liquidity, fee, amount_in, SwapDirection::QuoteToBase)
            }
            (CurveState::ConcentratedLiquidity { sqrt_price_q64, liquidity }, Leg::Sell) => {
                Self::clmm_amount_out(sqrt_price_q64, liquidity, fee, amount_in, SwapDirection::BaseToQuote)
            }
        }
    }

    /// Buy base on `pool_buy` with `amount_in` quote, sell it on `pool_sell`.
    /// Returns `final_output - amount_in` in raw quote units; 0 if either leg
    /// produced nothing.
    pub fn round_trip_profit(amount_in: u128, pool_buy: &PoolSnapshot, pool_sell: &PoolSnapshot) -> i128 {
        let Ok(input) = i128::try_from(amount_in) else {
            return 0;
        };

        let amount_mid = Self::swap(pool_buy, Leg::Buy, amount_in);
        if amount_mid == 0 {
            return 0;
        }

        let amount_out = Self::swap(pool_sell, Leg::Sell, amount_mid);
        if amount_out == 0 {
            return 0;
        }

        let Ok(output) = i128::try_from(amount_out) else {
            return 0;
        };

        trace!(
            "Round trip {} -> {}: in={}, mid={}, out={}",
            pool_buy.address().short(),
            pool_sell.address().short(),
            amount_in,
            amount_mid,
            amount_out
        );

        output - input
    }

    /// Raw spot price (quote units per base unit). Advisory only.
    ///
    /// Constant product: reserve_quote / reserve_base.
    /// Concentrated liquidity: (sqrt_price / 2^64)^2.
    pub fn spot_price(pool: &PoolSnapshot) -> Option<f64> {
        match pool.curve {
            CurveState::ConstantProduct { reserve_base, reserve_quote } => {
                if reserve_base == 0 || reserve_quote == 0 {
                    return None;
                }
                Some(reserve_quote as f64 / reserve_base as f64)
            }
            CurveState::ConcentratedLiquidity { sqrt_price_q64, .. } => {
                if sqrt_price_q64 == 0 {
                    return None;
                }
                let sqrt = sqrt_price_q64 as f64 / 2f64.powi(64);
                Some(sqrt * sqrt)
            }
        }
    }

    /// Quote-side depth used to bound trade sizing: the quote reserve, or the
    /// virtual quote reserve `L * sqrt_price / 2^64` inside the current tick.
    pub fn quote_depth(pool: &PoolSnapshot) -> u128 {
        match pool.curve {
            CurveState::ConstantProduct { reserve_quote, .. } => reserve_quote,
            CurveState::ConcentratedLiquidity { sqrt_price_q64, liquidity } => {
                narrow((U256::from(liquidity) * U256::from(sqrt_price_q64)) >> Q64_SHIFT)
            }
        }
    }
}

/// Fail closed on anything that does not fit back into u128
fn narrow(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(0)
}
