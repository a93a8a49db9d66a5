//! # Input Validation
//!
//! Requests are checked as a whole before any unit is touched. A request that
//! fails here is answered with "no result", never partially executed.

use std::collections::BTreeMap;

use crate::types::Asset;
use crate::types::SolveRequest;

/// Tolerance on the sum of target weights.
const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum Invalid {
    NoAssets,
    EmptySymbol,
    SymbolMismatch { key: String, symbol: String },
    BadNumber { symbol: String, field: &'static str, value: f64 },
    NoTargetWeight,
    WeightsExceedTotal(f64),
    Budget(f64),
    QuoteCurrency,
    Fees { field: &'static str, value: f64 },
}

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAssets => write!(f, "no assets to compute"),
            Self::EmptySymbol => write!(f, "asset with empty symbol"),
            Self::SymbolMismatch { key, symbol } => {
                write!(f, "asset keyed '{}' has symbol '{}'", key, symbol)
            }
            Self::BadNumber { symbol, field, value } => {
                write!(f, "{}: invalid {} {}", symbol, field, value)
            }
            Self::NoTargetWeight => write!(f, "no asset has a target weight"),
            Self::WeightsExceedTotal(sum) => write!(f, "target weights sum to {}%", sum),
            Self::Budget(budget) => write!(f, "invalid budget {}", budget),
            Self::QuoteCurrency => write!(f, "missing quote currency"),
            Self::Fees { field, value } => write!(f, "invalid fee {} {}", field, value),
        }
    }
}

impl std::error::Error for Invalid {}

pub type Result<T> = std::result::Result<T, Invalid>;

pub fn check_assets(assets: &BTreeMap<String, Asset>) -> Result<()> {
    if assets.is_empty() {
        return Err(Invalid::NoAssets);
    }

    let mut weight_sum = 0.0;
    for (key, asset) in assets {
        if asset.symbol.trim().is_empty() {
            return Err(Invalid::EmptySymbol);
        }
        if *key != asset.symbol {
            return Err(Invalid::SymbolMismatch { key: key.clone(), symbol: asset.symbol.clone() });
        }

        let bad = |field, value| Invalid::BadNumber { symbol: asset.symbol.clone(), field, value };
        if !asset.target_weight.is_finite() || !(0.0..=100.0).contains(&asset.target_weight) {
            return Err(bad("target weight", asset.target_weight));
        }
        if !asset.price.is_finite() || asset.price <= 0.0 {
            return Err(bad("price", asset.price));
        }
        if !asset.shares.is_finite() || asset.shares < 0.0 {
            return Err(bad("shares", asset.shares));
        }
        if !asset.current_amount.is_finite() || asset.current_amount < 0.0 {
            return Err(bad("current amount", asset.current_amount));
        }
        weight_sum += asset.target_weight;
    }

    if weight_sum <= 0.0 {
        return Err(Invalid::NoTargetWeight);
    }
    if weight_sum > 100.0 + WEIGHT_EPSILON {
        return Err(Invalid::WeightsExceedTotal(weight_sum));
    }
    Ok(())
}

pub fn check_solve(request: &SolveRequest) -> Result<()> {
    if !request.budget.is_finite() || request.budget < 0.0 {
        return Err(Invalid::Budget(request.budget));
    }
    if request.quote_currency.trim().is_empty() {
        return Err(Invalid::QuoteCurrency);
    }
    if let Some(fees) = &request.fees {
        if !fees.fixed.is_finite() || fees.fixed < 0.0 {
            return Err(Invalid::Fees { field: "fixed", value: fees.fixed });
        }
        if !fees.percentage.is_finite() || !(0.0..100.0).contains(&fees.percentage) {
            return Err(Invalid::Fees { field: "percentage", value: fees.percentage });
        }
    }
    check_assets(&request.assets)
}
