//! # Request and Result Types
//!
//! Shapes exchanged with the UI layer (camelCase JSON) and, unchanged, with
//! the optimizer unit.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// One holding in a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub symbol: String,
    /// Desired share of the portfolio, in percent.
    pub target_weight: f64,
    /// Shares currently held.
    #[serde(default)]
    pub shares: f64,
    pub price: f64,
    /// Only whole shares can be traded.
    #[serde(default)]
    pub whole_shares: bool,
    /// Current market value of the holding, in the quote currency.
    #[serde(default)]
    pub current_amount: f64,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, target_weight: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            target_weight,
            shares: 0.0,
            price,
            whole_shares: false,
            current_amount: 0.0,
        }
    }

    /// Sets the held shares and derives the current amount from the price.
    pub fn holding(mut self, shares: f64) -> Self {
        self.shares = shares;
        self.current_amount = shares * self.price;
        self
    }

    pub fn whole_shares(mut self, whole: bool) -> Self {
        self.whole_shares = whole;
        self
    }
}

pub type AnalyzeAsset = Asset;
pub type SolveAsset = Asset;

/// Assets keyed by symbol.
pub type AnalyzeRequest = BTreeMap<String, AnalyzeAsset>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFees {
    /// Flat fee per trade.
    #[serde(default)]
    pub fixed: f64,
    /// Fee proportional to the traded amount, in percent.
    #[serde(default)]
    pub percentage: f64,
}

impl TransactionFees {
    /// Fee charged for trading `amount` (of either sign). No trade, no fee.
    pub fn cost(&self, amount: f64) -> f64 {
        if amount == 0.0 {
            0.0
        } else {
            self.fixed + amount.abs() * self.percentage / 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub budget: f64,
    pub assets: BTreeMap<String, SolveAsset>,
    pub quote_currency: String,
    #[serde(default)]
    pub fees: Option<TransactionFees>,
    #[serde(default)]
    pub buy_only: bool,
    #[serde(default)]
    pub use_all_budget: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    /// Amount to add so that no holding is above its target weight.
    pub suggested_investment: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    /// Value of each holding after the trades.
    pub targets: BTreeMap<String, f64>,
    /// Shares to trade per symbol; negative means sell.
    pub shares: BTreeMap<String, f64>,
    /// Value each holding would have at exactly its target weight.
    pub theoretical_allocations: BTreeMap<String, f64>,
    pub leftover_budget: f64,
    /// Total fees charged by the trades.
    #[serde(default)]
    pub fees_paid: f64,
}
