//! # Reference Optimizer
//!
//! Pure rebalancing math run inside the optimizer unit. Weights are given in
//! percent and normalized by their sum, so a portfolio whose weights add up to
//! less than 100% is treated proportionally.

use crate::types::AllocationResult;
use crate::types::AnalyzeRequest;
use crate::types::AnalyzeResult;
use crate::types::Asset;
use crate::types::SolveRequest;

/// Amounts below this are treated as zero.
const DUST: f64 = 1e-9;

/// Extra top-up rounds allowed per asset when spending the whole budget.
const TOP_UP_ROUNDS_PER_ASSET: usize = 4;

/// Smallest investment after which no holding sits above its target weight.
pub fn suggest_investment(assets: &AnalyzeRequest) -> AnalyzeResult {
    let total_weight: f64 = assets.values().map(|a| a.target_weight).sum();
    let held: f64 = assets.values().map(|a| a.current_amount).sum();

    // Portfolio size at which the most overweight holding reaches its target.
    let required = assets
        .values()
        .filter(|a| a.target_weight > 0.0)
        .map(|a| a.current_amount / (a.target_weight / total_weight))
        .fold(0.0, f64::max);

    AnalyzeResult { suggested_investment: clean(required - held).max(0.0) }
}

/// Per-asset working state while solving.
struct Position<'a> {
    asset: &'a Asset,
    theoretical: f64,
    /// Signed traded value, before fees.
    amount: f64,
    /// Signed traded shares.
    shares: f64,
    fee: f64,
}

impl Position<'_> {
    fn gap(&self) -> f64 {
        self.theoretical - (self.asset.current_amount + self.amount)
    }
}

/// Splits `budget` (plus, unless buy-only, the proceeds of selling overweight
/// holdings) across the assets to move them towards their target weights.
pub fn allocate(request: &SolveRequest) -> AllocationResult {
    let fees = request.fees.unwrap_or_default();
    let pct = fees.percentage / 100.0;
    let total_weight: f64 = request.assets.values().map(|a| a.target_weight).sum();
    let held: f64 = request.assets.values().map(|a| a.current_amount).sum();
    let portfolio = held + request.budget;

    let mut positions: Vec<Position<'_>> = request
        .assets
        .values()
        .map(|asset| Position {
            asset,
            theoretical: portfolio * asset.target_weight / total_weight,
            amount: 0.0,
            shares: 0.0,
            fee: 0.0,
        })
        .collect();

    // Sells first, their proceeds fund the buys.
    let mut proceeds = 0.0;
    if !request.buy_only {
        for position in positions.iter_mut().filter(|p| p.gap() < -DUST) {
            let asset = position.asset;
            let wanted = (-position.gap()).min(asset.current_amount);
            let shares = if asset.whole_shares {
                (wanted / asset.price + DUST).floor().min(asset.shares.floor())
            } else {
                wanted / asset.price
            };
            let amount = shares * asset.price;
            let fee = fees.cost(amount);
            if amount - fee <= DUST {
                continue;
            }
            position.amount = -amount;
            position.shares = -shares;
            position.fee = fee;
            proceeds += amount - fee;
        }
    }

    let available = request.budget + proceeds;
    let wanted: f64 = positions.iter().map(|p| p.gap().max(0.0)).sum();
    let scale = if wanted > available && wanted > 0.0 { available / wanted } else { 1.0 };

    let mut spent = 0.0;
    for position in positions.iter_mut() {
        let spend = position.gap().max(0.0) * scale;
        let net = (spend - fees.fixed) / (1.0 + pct);
        if net <= DUST {
            continue;
        }
        let asset = position.asset;
        let shares = if asset.whole_shares { (net / asset.price + DUST).floor() } else { net / asset.price };
        if shares <= 0.0 {
            continue;
        }
        let amount = shares * asset.price;
        position.amount = amount;
        position.shares = shares;
        position.fee = fees.cost(amount);
        spent += amount + position.fee;
    }

    let mut leftover = available - spent;

    if request.use_all_budget {
        let rounds = positions.len() * TOP_UP_ROUNDS_PER_ASSET;
        for _ in 0..rounds {
            // Marginal cost of one more share, and the fixed fee if this opens a trade.
            let pick = positions
                .iter()
                .enumerate()
                .filter(|(_, p)| p.amount >= 0.0)
                .filter(|(_, p)| {
                    let opening = if p.amount == 0.0 { fees.fixed } else { 0.0 };
                    let unit = if p.asset.whole_shares { p.asset.price } else { DUST };
                    opening + unit * (1.0 + pct) <= leftover + DUST
                })
                .max_by(|(_, a), (_, b)| a.gap().total_cmp(&b.gap()))
                .map(|(i, _)| i);
            let Some(index) = pick else {
                break;
            };

            let position = &mut positions[index];
            let asset = position.asset;
            let opening = if position.amount == 0.0 { fees.fixed } else { 0.0 };
            let affordable = (leftover - opening) / (1.0 + pct);
            let shares = if asset.whole_shares {
                let fit = (affordable / asset.price + DUST).floor();
                let gap = position.gap();
                if gap > 0.0 { fit.min((gap / asset.price).ceil().max(1.0)) } else { fit }
            } else {
                affordable / asset.price
            };
            if shares <= 0.0 {
                break;
            }

            let before = position.amount + position.fee;
            position.shares += shares;
            position.amount = position.shares * asset.price;
            position.fee = fees.cost(position.amount);
            leftover -= position.amount + position.fee - before;
        }
    }

    let mut result = AllocationResult::default();
    let mut fees_paid = 0.0;
    for position in &positions {
        let symbol = position.asset.symbol.clone();
        fees_paid += position.fee;
        result.targets.insert(symbol.clone(), clean(position.asset.current_amount + position.amount));
        result.shares.insert(symbol.clone(), clean(position.shares));
        result.theoretical_allocations.insert(symbol, clean(position.theoretical));
    }
    // Includes unspent sale proceeds.
    result.leftover_budget = clean(leftover).max(0.0);
    result.fees_paid = clean(fees_paid);
    result
}

fn clean(value: f64) -> f64 {
    if value.abs() < DUST { 0.0 } else { value }
}
