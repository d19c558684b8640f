//! Ingestion Boundary
//!
//! Everything that arrives from outside (pool catalog entries, account
//! update notifications) is parsed into loosely typed `Raw*` records first and
//! then validated into the core types. Nothing partially typed gets past this
//! module: a record either converts completely or is rejected with a
//! [`ValidationError`].
//!
//! Update line format (one JSON object per line):
//!   {"kind":"reserve","address":"…","side":"base","amount":"123","slot":42}
//!   {"kind":"clmm","address":"…","sqrtPriceX64":"…","liquidity":"…","slot":42}
//!   {"kind":"vault","address":"…","side":"quote","data":"<base64>","slot":42}
//!
//! Amounts are decimal strings (or JSON integers) so u128 values survive.
//! `vault` lines carry the raw token account of one pool vault as delivered
//! by an account subscription; `address` is still the pool address.

use base64::engine::general_purpose::STANDARD as B64STD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    CurveType, FeeRate, FullUpdate, Mint, PartialUpdate, PoolAddress, PoolMetadata, PoolUpdate, ReserveSide,
};

/// Byte offset of the `amount` field in an SPL token account
const TOKEN_ACCOUNT_AMOUNT_OFFSET: usize = 64;

/// Largest power of ten that fits a u128
const MAX_DECIMALS: u8 = 38;

/// Decoded length of an ed25519 public key
const PUBKEY_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("invalid {field}: {value:?}")]
    InvalidAmount { field: &'static str, value: String },

    #[error("{field} must be non-zero")]
    Zero { field: &'static str },

    #[error("fee out of range [0, 1): {0}")]
    FeeOutOfRange(String),

    #[error("unknown curve type {0:?}")]
    UnknownCurve(String),

    #[error("{field} decimals {value} exceed {max}")]
    Decimals { field: &'static str, value: u8, max: u8 },

    #[error("base and quote mint are identical: {0}")]
    SameMint(String),

    #[error("token account data too short: {0} bytes")]
    AccountDataTooShort(usize),

    #[error("account data is not valid base64: {0}")]
    AccountDataEncoding(String),
}

/// JSON number or decimal string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Text(String),
    Number(u64),
}

impl RawAmount {
    fn parse(&self, field: &'static str) -> Result<u128, ValidationError> {
        match self {
            RawAmount::Number(n) => Ok(*n as u128),
            RawAmount::Text(s) => s.trim().parse::<u128>().map_err(|_| ValidationError::InvalidAmount {
                field,
                value: s.clone(),
            }),
        }
    }
}

/// Update notification exactly as it arrives on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawPoolUpdate {
    /// One vault of a constant-product pool
    #[serde(rename_all = "camelCase")]
    Reserve {
        address: String,
        side: String,
        amount: RawAmount,
        slot: u64,
    },
    /// Raw token account of one constant-product vault
    #[serde(rename_all = "camelCase")]
    Vault {
        address: String,
        side: String,
        data: String,
        slot: u64,
    },
    /// Whole concentrated-liquidity pool state
    #[serde(rename_all = "camelCase")]
    Clmm {
        address: String,
        sqrt_price_x64: RawAmount,
        liquidity: RawAmount,
        slot: u64,
    },
}

impl TryFrom<RawPoolUpdate> for PoolUpdate {
    type Error = ValidationError;

    fn try_from(raw: RawPoolUpdate) -> Result<Self, Self::Error> {
        match raw {
            RawPoolUpdate::Reserve {
                address,
                side,
                amount,
                slot,
            } => Ok(PoolUpdate::Partial(PartialUpdate {
                address: validate_address(&address)?,
                side: parse_side(&side)?,
                value: amount.parse("amount")?,
                sequence: slot,
            })),
            RawPoolUpdate::Vault {
                address,
                side,
                data,
                slot,
            } => {
                let bytes = B64STD
                    .decode(data.trim())
                    .map_err(|e| ValidationError::AccountDataEncoding(e.to_string()))?;
                Ok(PoolUpdate::Partial(PartialUpdate {
                    address: validate_address(&address)?,
                    side: parse_side(&side)?,
                    value: decode_token_amount(&bytes)? as u128,
                    sequence: slot,
                }))
            }
            RawPoolUpdate::Clmm {
                address,
                sqrt_price_x64,
                liquidity,
                slot,
            } => {
                let sqrt_price_q64 = sqrt_price_x64.parse("sqrtPriceX64")?;
                if sqrt_price_q64 == 0 {
                    return Err(ValidationError::Zero { field: "sqrtPriceX64" });
                }
                Ok(PoolUpdate::Full(FullUpdate {
                    address: validate_address(&address)?,
                    sqrt_price_q64,
                    liquidity: liquidity.parse("liquidity")?,
                    sequence: slot,
                }))
            }
        }
    }
}

fn parse_side(side: &str) -> Result<ReserveSide, ValidationError> {
    match side.to_ascii_lowercase().as_str() {
        "base" => Ok(ReserveSide::Base),
        "quote" => Ok(ReserveSide::Quote),
        _ => Err(ValidationError::Malformed(format!("unknown reserve side {:?}", side))),
    }
}

/// Parse and validate one NDJSON update line
pub fn parse_update_line(line: &str) -> Result<PoolUpdate, ValidationError> {
    let raw: RawPoolUpdate =
        serde_json::from_str(line.trim()).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    PoolUpdate::try_from(raw)
}

/// Monitored pool, as listed in the `[[pools]]` catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCatalogEntry {
    pub address: String,
    /// "cpmm" / "clmm" (case-insensitive), or the long names
    #[serde(rename = "type")]
    pub curve: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Fee as a fraction (0.0025 = 25 bps)
    #[serde(default)]
    pub fee_rate: Option<f64>,
    /// Exact fee, preferred over `fee_rate` when both are given
    #[serde(default)]
    pub fee_numerator: Option<u64>,
    #[serde(default)]
    pub fee_denominator: Option<u64>,
}

impl TryFrom<&PoolCatalogEntry> for PoolMetadata {
    type Error = ValidationError;

    fn try_from(entry: &PoolCatalogEntry) -> Result<Self, Self::Error> {
        let curve_type = match entry.curve.to_ascii_lowercase().as_str() {
            "cpmm" | "constant_product" => CurveType::ConstantProduct,
            "clmm" | "concentrated_liquidity" => CurveType::ConcentratedLiquidity,
            _ => return Err(ValidationError::UnknownCurve(entry.curve.clone())),
        };

        for (field, value) in [("base", entry.base_decimals), ("quote", entry.quote_decimals)] {
            if value > MAX_DECIMALS {
                return Err(ValidationError::Decimals {
                    field,
                    value,
                    max: MAX_DECIMALS,
                });
            }
        }

        let base_mint = validate_address(&entry.base_mint)?;
        let quote_mint = validate_address(&entry.quote_mint)?;
        if base_mint == quote_mint {
            return Err(ValidationError::SameMint(entry.base_mint.clone()));
        }

        let fee = match (entry.fee_numerator, entry.fee_denominator, entry.fee_rate) {
            (Some(num), Some(den), _) => {
                FeeRate::new(num, den).ok_or_else(|| ValidationError::FeeOutOfRange(format!("{}/{}", num, den)))?
            }
            (None, None, Some(rate)) => {
                FeeRate::from_fraction(rate).ok_or_else(|| ValidationError::FeeOutOfRange(rate.to_string()))?
            }
            _ => {
                return Err(ValidationError::Malformed(format!(
                    "pool {} needs fee_rate or fee_numerator + fee_denominator",
                    entry.address
                )))
            }
        };

        Ok(PoolMetadata {
            address: validate_address(&entry.address)?,
            curve_type,
            base_mint: Mint::new(base_mint.as_str()),
            quote_mint: Mint::new(quote_mint.as_str()),
            base_decimals: entry.base_decimals,
            quote_decimals: entry.quote_decimals,
            fee,
        })
    }
}

/// Base58 public key that decodes to exactly 32 bytes
pub fn validate_address(address: &str) -> Result<PoolAddress, ValidationError> {
    let trimmed = address.trim();
    match bs58::decode(trimmed).into_vec() {
        Ok(bytes) if bytes.len() == PUBKEY_BYTES => Ok(PoolAddress::new(trimmed)),
        _ => Err(ValidationError::InvalidAddress(address.to_string())),
    }
}

/// Read the little-endian u64 `amount` out of raw SPL token account data
pub fn decode_token_amount(data: &[u8]) -> Result<u64, ValidationError> {
    let bytes = data
        .get(TOKEN_ACCOUNT_AMOUNT_OFFSET..TOKEN_ACCOUNT_AMOUNT_OFFSET + 8)
        .ok_or(ValidationError::AccountDataTooShort(data.len()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}
