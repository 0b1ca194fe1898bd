//! Margin evaluation and position/PnL accounting
//!
//! All monetary values are fixed-point integers. Accounts and markets are
//! created lazily on first reference. Maps are `BTreeMap` so iteration
//! order (funding sweeps, liquidation scans) is deterministic.

use std::collections::BTreeMap;
use types::ids::{AccountId, MarketId};
use types::order::Side;

const BASIS_POINT_DENOMINATOR: i64 = 10_000;

/// Stable numeric reject codes surfaced in risk results.
pub mod reject {
    pub const UNKNOWN_MARKET: u16 = 2001;
    pub const INSUFFICIENT_MARGIN: u16 = 2002;
    pub const REDUCE_ONLY: u16 = 2003;
}

#[derive(Debug, Clone, Copy)]
pub struct MarketRiskConfig {
    pub contract_size: i64,
    pub initial_margin_bp: i32,
    pub maintenance_margin_bp: i32,
}

#[derive(Debug, Clone, Copy, Default)]
struct MarketState {
    config: MarketRiskConfig,
    mark_price: i64,
}

impl Default for MarketRiskConfig {
    fn default() -> Self {
        Self {
            contract_size: 1,
            initial_margin_bp: 0,
            maintenance_margin_bp: 0,
        }
    }
}

/// Signed position: positive = long. `entry_price` is zero when flat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionState {
    pub quantity: i64,
    pub entry_price: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub collateral: i64,
    pub realized_pnl: i64,
    pub positions: BTreeMap<MarketId, PositionState>,
}

/// One executed trade from one account's perspective.
#[derive(Debug, Clone, Copy)]
pub struct FillContext {
    pub account: AccountId,
    pub market: MarketId,
    pub side: Side,
    pub quantity: i64,
    pub price: i64,
}

/// A hypothetical order to gate before it reaches the matcher.
#[derive(Debug, Clone, Copy)]
pub struct OrderIntent {
    pub account: AccountId,
    pub market: MarketId,
    pub side: Side,
    pub quantity: i64,
    pub limit_price: i64,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    RejectedUnknownMarket,
    RejectedInsufficientMargin,
    RejectedReduceOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskResult {
    pub decision: Decision,
    pub reject_code: u16,
    pub equity: i64,
    pub initial_margin_required: i64,
    pub maintenance_margin_required: i64,
}

impl Default for RiskResult {
    fn default() -> Self {
        Self {
            decision: Decision::Accepted,
            reject_code: 0,
            equity: 0,
            initial_margin_required: 0,
            maintenance_margin_required: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarginSummary {
    pub equity: i64,
    pub initial_margin: i64,
    pub maintenance_margin: i64,
}

#[derive(Default)]
pub struct RiskEngine {
    accounts: BTreeMap<AccountId, AccountState>,
    markets: BTreeMap<MarketId, MarketState>,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_market(&mut self, market: MarketId, config: MarketRiskConfig) {
        self.markets
            .entry(market)
            .and_modify(|state| state.config = config)
            .or_insert(MarketState {
                config,
                mark_price: 0,
            });
    }

    pub fn set_mark_price(&mut self, market: MarketId, mark_price: i64) {
        self.markets.entry(market).or_default().mark_price = mark_price;
    }

    pub fn mark_price(&self, market: MarketId) -> i64 {
        self.markets
            .get(&market)
            .map(|state| state.mark_price)
            .unwrap_or(0)
    }

    pub fn credit_collateral(&mut self, account: AccountId, amount: i64) {
        self.accounts.entry(account).or_default().collateral += amount;
    }

    pub fn debit_collateral(&mut self, account: AccountId, amount: i64) {
        self.accounts.entry(account).or_default().collateral -= amount;
    }

    pub fn find_account(&self, account: AccountId) -> Option<&AccountState> {
        self.accounts.get(&account)
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    pub fn position(&self, account: AccountId, market: MarketId) -> PositionState {
        self.accounts
            .get(&account)
            .and_then(|state| state.positions.get(&market))
            .copied()
            .unwrap_or_default()
    }

    pub fn market_config(&self, market: MarketId) -> Option<MarketRiskConfig> {
        self.markets.get(&market).map(|state| state.config)
    }

    /// Apply one executed trade to the account's position.
    ///
    /// Same-direction fills extend the position at a volume-weighted entry
    /// price. Opposite-direction fills realize PnL on the closed quantity
    /// (credited to both `realized_pnl` and `collateral`); a flip re-opens
    /// at the fill price and going flat clears the entry price.
    pub fn apply_fill(&mut self, fill: &FillContext) {
        let contract_size = self
            .markets
            .entry(fill.market)
            .or_default()
            .config
            .contract_size;
        let account = self.accounts.entry(fill.account).or_default();
        let position = account.positions.entry(fill.market).or_default();

        let signed_qty = match fill.side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };
        let previous_qty = position.quantity;

        let same_direction =
            previous_qty == 0 || (previous_qty > 0) == (signed_qty > 0);
        if same_direction {
            let new_qty = previous_qty + signed_qty;
            if new_qty != 0 {
                let total_abs = previous_qty.abs() + signed_qty.abs();
                let weighted_notional = position.entry_price * previous_qty.abs()
                    + fill.price * signed_qty.abs();
                position.entry_price = weighted_notional / total_abs;
            } else {
                position.entry_price = 0;
            }
            position.quantity = new_qty;
            return;
        }

        let closing_qty = previous_qty.abs().min(signed_qty.abs());
        let pnl_per_contract = if previous_qty > 0 {
            fill.price - position.entry_price
        } else {
            position.entry_price - fill.price
        };
        let realized = closing_qty * pnl_per_contract * contract_size;
        account.realized_pnl += realized;
        account.collateral += realized;

        let remainder = previous_qty + signed_qty;
        position.quantity = remainder;
        if remainder == 0 {
            position.entry_price = 0;
        } else if (previous_qty > 0) != (remainder > 0) {
            // Sign flipped: the excess re-opens at the fill price
            position.entry_price = fill.price;
        }
    }

    /// Project the intent onto the account's exposures and decide.
    pub fn evaluate_order(&self, intent: &OrderIntent) -> RiskResult {
        let mut result = RiskResult::default();

        if !self.markets.contains_key(&intent.market) {
            result.decision = Decision::RejectedUnknownMarket;
            result.reject_code = reject::UNKNOWN_MARKET;
            return result;
        }

        let existing_qty = self.position(intent.account, intent.market).quantity;
        let signed_qty = match intent.side {
            Side::Buy => intent.quantity,
            Side::Sell => -intent.quantity,
        };
        let projected_qty = existing_qty + signed_qty;

        if intent.reduce_only && projected_qty.abs() > existing_qty.abs() {
            result.decision = Decision::RejectedReduceOnly;
            result.reject_code = reject::REDUCE_ONLY;
            return result;
        }

        let summary = self.summary_with_delta(
            intent.account,
            Some(FillContext {
                account: intent.account,
                market: intent.market,
                side: intent.side,
                quantity: intent.quantity,
                price: intent.limit_price,
            }),
        );
        result.equity = summary.equity;
        result.initial_margin_required = summary.initial_margin;
        result.maintenance_margin_required = summary.maintenance_margin;

        if summary.initial_margin > summary.equity {
            result.decision = Decision::RejectedInsufficientMargin;
            result.reject_code = reject::INSUFFICIENT_MARGIN;
            return result;
        }

        result.decision = Decision::Accepted;
        result
    }

    /// Equity and margin requirements over the account's actual exposures.
    pub fn account_summary(&self, account: AccountId) -> MarginSummary {
        self.summary_with_delta(account, None)
    }

    fn summary_with_delta(&self, account: AccountId, delta: Option<FillContext>) -> MarginSummary {
        struct Exposure {
            market: MarketId,
            quantity: i64,
            entry_price: i64,
            existed: bool,
        }

        let mut summary = MarginSummary::default();
        let account_state = self.accounts.get(&account);
        if let Some(state) = account_state {
            summary.equity = state.collateral + state.realized_pnl;
        }

        let mut exposures: Vec<Exposure> = account_state
            .map(|state| {
                state
                    .positions
                    .iter()
                    .map(|(&market, position)| Exposure {
                        market,
                        quantity: position.quantity,
                        entry_price: position.entry_price,
                        existed: true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(delta) = &delta {
            let signed_qty = match delta.side {
                Side::Buy => delta.quantity,
                Side::Sell => -delta.quantity,
            };
            if let Some(exposure) = exposures.iter_mut().find(|e| e.market == delta.market) {
                exposure.quantity += signed_qty;
            } else {
                exposures.push(Exposure {
                    market: delta.market,
                    quantity: signed_qty,
                    entry_price: delta.price,
                    existed: false,
                });
            }
        }

        for exposure in &exposures {
            if exposure.quantity == 0 {
                continue;
            }
            let Some(market_state) = self.markets.get(&exposure.market) else {
                continue;
            };

            // Mark fallback: configured mark, then the delta's limit price,
            // then the exposure's entry price.
            let mut mark_price = market_state.mark_price;
            if mark_price == 0 {
                if let Some(delta) = &delta {
                    if delta.market == exposure.market && delta.price != 0 {
                        mark_price = delta.price;
                    }
                }
                if mark_price == 0 && exposure.entry_price != 0 {
                    mark_price = exposure.entry_price;
                }
            }

            let contract_size = market_state.config.contract_size;
            let notional = exposure.quantity.abs() * mark_price * contract_size;

            summary.initial_margin +=
                apply_basis_points(notional, market_state.config.initial_margin_bp);
            summary.maintenance_margin +=
                apply_basis_points(notional, market_state.config.maintenance_margin_bp);

            if exposure.existed {
                let unrealized =
                    exposure.quantity * (mark_price - exposure.entry_price) * contract_size;
                summary.equity += unrealized;
            }
        }

        summary
    }
}

/// Half-up basis-point application: `ceil(notional * bp / 10000)`.
fn apply_basis_points(notional: i64, basis_points: i32) -> i64 {
    (notional * i64::from(basis_points) + (BASIS_POINT_DENOMINATOR - 1)) / BASIS_POINT_DENOMINATOR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_market() -> RiskEngine {
        let mut engine = RiskEngine::new();
        engine.configure_market(
            MarketId(1),
            MarketRiskConfig {
                contract_size: 1,
                initial_margin_bp: 500,
                maintenance_margin_bp: 300,
            },
        );
        engine.set_mark_price(MarketId(1), 1_000);
        engine
    }

    fn fill(account: u64, side: Side, quantity: i64, price: i64) -> FillContext {
        FillContext {
            account: AccountId(account),
            market: MarketId(1),
            side,
            quantity,
            price,
        }
    }

    #[test]
    fn test_open_long_sets_entry() {
        let mut engine = engine_with_market();
        engine.apply_fill(&fill(1, Side::Buy, 400, 1_000));
        let position = engine.position(AccountId(1), MarketId(1));
        assert_eq!(position.quantity, 400);
        assert_eq!(position.entry_price, 1_000);
    }

    #[test]
    fn test_same_side_vwap_entry() {
        let mut engine = engine_with_market();
        engine.apply_fill(&fill(1, Side::Buy, 100, 1_000));
        engine.apply_fill(&fill(1, Side::Buy, 100, 1_100));
        let position = engine.position(AccountId(1), MarketId(1));
        assert_eq!(position.quantity, 200);
        assert_eq!(position.entry_price, 1_050);
    }

    #[test]
    fn test_partial_close_realizes_pnl() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1), 10_000);
        engine.apply_fill(&fill(1, Side::Buy, 100, 1_000));
        engine.apply_fill(&fill(1, Side::Sell, 40, 1_050));

        let position = engine.position(AccountId(1), MarketId(1));
        assert_eq!(position.quantity, 60);
        assert_eq!(position.entry_price, 1_000);

        let account = engine.find_account(AccountId(1)).unwrap();
        assert_eq!(account.realized_pnl, 40 * 50);
        assert_eq!(account.collateral, 10_000 + 40 * 50);
    }

    #[test]
    fn test_full_close_clears_entry() {
        let mut engine = engine_with_market();
        engine.apply_fill(&fill(1, Side::Buy, 100, 1_000));
        engine.apply_fill(&fill(1, Side::Sell, 100, 900));

        let position = engine.position(AccountId(1), MarketId(1));
        assert_eq!(position.quantity, 0);
        assert_eq!(position.entry_price, 0);
        let account = engine.find_account(AccountId(1)).unwrap();
        assert_eq!(account.realized_pnl, -100 * 100);
    }

    #[test]
    fn test_flip_reopens_at_fill_price() {
        let mut engine = engine_with_market();
        engine.apply_fill(&fill(1, Side::Buy, 100, 1_000));
        engine.apply_fill(&fill(1, Side::Sell, 150, 1_020));

        let position = engine.position(AccountId(1), MarketId(1));
        assert_eq!(position.quantity, -50);
        assert_eq!(position.entry_price, 1_020);
        // Realized only on the closed 100
        let account = engine.find_account(AccountId(1)).unwrap();
        assert_eq!(account.realized_pnl, 100 * 20);
    }

    #[test]
    fn test_short_close_pnl_sign() {
        let mut engine = engine_with_market();
        engine.apply_fill(&fill(1, Side::Sell, 100, 1_000));
        engine.apply_fill(&fill(1, Side::Buy, 100, 950));
        let account = engine.find_account(AccountId(1)).unwrap();
        assert_eq!(account.realized_pnl, 100 * 50);
    }

    #[test]
    fn test_evaluate_accepts_with_margin() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1001), 30_000);
        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1001),
            market: MarketId(1),
            side: Side::Buy,
            quantity: 400,
            limit_price: 1_000,
            reduce_only: false,
        });
        assert_eq!(result.decision, Decision::Accepted);
        // 400 * 1000 * 5% = 20000
        assert_eq!(result.initial_margin_required, 20_000);
        assert_eq!(result.maintenance_margin_required, 12_000);
        assert_eq!(result.equity, 30_000);
    }

    #[test]
    fn test_evaluate_unknown_market() {
        let engine = RiskEngine::new();
        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1),
            market: MarketId(42),
            side: Side::Buy,
            quantity: 1,
            limit_price: 1,
            reduce_only: false,
        });
        assert_eq!(result.decision, Decision::RejectedUnknownMarket);
        assert_eq!(result.reject_code, reject::UNKNOWN_MARKET);
    }

    #[test]
    fn test_evaluate_insufficient_margin() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1), 100);
        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1),
            market: MarketId(1),
            side: Side::Buy,
            quantity: 400,
            limit_price: 1_000,
            reduce_only: false,
        });
        assert_eq!(result.decision, Decision::RejectedInsufficientMargin);
        assert_eq!(result.reject_code, reject::INSUFFICIENT_MARGIN);
    }

    #[test]
    fn test_reduce_only_rejects_growth() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1001), 30_000);
        engine.apply_fill(&fill(1001, Side::Buy, 400, 1_000));
        engine.set_mark_price(MarketId(1), 960);

        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1001),
            market: MarketId(1),
            side: Side::Buy,
            quantity: 10,
            limit_price: 950,
            reduce_only: true,
        });
        assert_eq!(result.decision, Decision::RejectedReduceOnly);
        assert_eq!(result.reject_code, reject::REDUCE_ONLY);
    }

    #[test]
    fn test_reduce_only_accepts_shrink() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1001), 30_000);
        engine.apply_fill(&fill(1001, Side::Buy, 400, 1_000));

        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1001),
            market: MarketId(1),
            side: Side::Sell,
            quantity: 100,
            limit_price: 1_000,
            reduce_only: true,
        });
        assert_eq!(result.decision, Decision::Accepted);
    }

    #[test]
    fn test_equity_includes_unrealized() {
        let mut engine = engine_with_market();
        engine.credit_collateral(AccountId(1), 30_000);
        engine.apply_fill(&fill(1, Side::Buy, 400, 1_000));
        engine.set_mark_price(MarketId(1), 960);

        let summary = engine.account_summary(AccountId(1));
        // 400 * (960 - 1000) = -16000 unrealized
        assert_eq!(summary.equity, 30_000 - 16_000);
        assert_eq!(summary.initial_margin, apply_basis_points(400 * 960, 500));
        assert_eq!(summary.maintenance_margin, apply_basis_points(400 * 960, 300));
    }

    #[test]
    fn test_mark_fallback_to_delta_price() {
        let mut engine = RiskEngine::new();
        engine.configure_market(
            MarketId(2),
            MarketRiskConfig {
                contract_size: 1,
                initial_margin_bp: 1_000,
                maintenance_margin_bp: 500,
            },
        );
        // No mark price configured; projection uses the limit price
        engine.credit_collateral(AccountId(1), 1_000);
        let result = engine.evaluate_order(&OrderIntent {
            account: AccountId(1),
            market: MarketId(2),
            side: Side::Buy,
            quantity: 10,
            limit_price: 500,
            reduce_only: false,
        });
        assert_eq!(result.initial_margin_required, 500);
        assert_eq!(result.decision, Decision::Accepted);
    }

    #[test]
    fn test_rounding_half_up() {
        assert_eq!(apply_basis_points(10_000, 1), 1);
        assert_eq!(apply_basis_points(9_999, 1), 1);
        assert_eq!(apply_basis_points(10_001, 1), 2);
        assert_eq!(apply_basis_points(0, 500), 0);
    }
}
