//! Margin-health evaluation and forced close-out
//!
//! The evaluator grades an account against its margin requirements. The
//! executor closes out unhealthy accounts by routing IOC reduce-only
//! orders at the worst-extreme price through the matching engine and
//! feeding the resulting fills back into risk.

use crate::engine::{FillContext, RiskEngine};
use matcher::{FillEvent, MatchingEngine, OrderRequest};
use tracing::info;
use types::ids::{AccountId, MarketId, OrderId, SequenceId, SessionId};
use types::order::{flags, Side, TimeInForce};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationStatus {
    Healthy,
    /// Equity below initial margin: bring exposure down.
    NeedsPartial,
    /// Equity below maintenance margin: close everything.
    NeedsFull,
}

#[derive(Debug, Clone, Copy)]
pub struct LiquidationResult {
    pub status: LiquidationStatus,
    pub equity: i64,
    pub initial_margin: i64,
    pub maintenance_margin: i64,
    pub deficit: i64,
}

/// Grade one account's margin health.
pub fn evaluate(risk: &RiskEngine, account: AccountId) -> LiquidationResult {
    let summary = risk.account_summary(account);
    let mut result = LiquidationResult {
        status: LiquidationStatus::Healthy,
        equity: summary.equity,
        initial_margin: summary.initial_margin,
        maintenance_margin: summary.maintenance_margin,
        deficit: 0,
    };

    if summary.maintenance_margin == 0 {
        return result;
    }

    if summary.equity < summary.maintenance_margin {
        result.status = LiquidationStatus::NeedsFull;
        result.deficit = summary.maintenance_margin - summary.equity;
        return result;
    }

    if summary.equity < summary.initial_margin {
        result.status = LiquidationStatus::NeedsPartial;
        result.deficit = summary.initial_margin - summary.equity;
    }

    result
}

/// One forced close-out order emitted by the executor.
#[derive(Debug, Clone)]
pub struct LiquidationOrder {
    pub account: AccountId,
    pub market: MarketId,
    pub side: Side,
    pub quantity: i64,
    pub fills: Vec<FillEvent>,
}

/// Emits forced reduce-only orders for unhealthy accounts.
///
/// Fills are applied to the liquidated account here; maker-side application
/// needs the resting-order table and stays with the caller.
#[derive(Default)]
pub struct LiquidationExecutor {
    next_local: u32,
}

impl LiquidationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_and_liquidate(
        &mut self,
        risk: &mut RiskEngine,
        matching: &mut MatchingEngine,
        accounts: &[AccountId],
    ) -> Vec<LiquidationOrder> {
        let mut orders = Vec::new();

        for &account in accounts {
            let result = evaluate(risk, account);
            if result.status == LiquidationStatus::Healthy {
                continue;
            }

            let Some(state) = risk.find_account(account) else {
                continue;
            };
            let positions: Vec<(MarketId, i64)> = state
                .positions
                .iter()
                .filter(|(_, position)| position.quantity != 0)
                .map(|(&market, position)| (market, position.quantity))
                .collect();

            for (market, quantity) in positions {
                let side = if quantity > 0 { Side::Sell } else { Side::Buy };
                let order = self.execute(risk, matching, account, market, side, quantity.abs());
                info!(
                    account = %account,
                    market = %market,
                    ?side,
                    quantity = quantity.abs(),
                    fills = order.fills.len(),
                    "liquidation order executed"
                );
                orders.push(order);
            }
        }

        orders
    }

    fn execute(
        &mut self,
        risk: &mut RiskEngine,
        matching: &mut MatchingEngine,
        account: AccountId,
        market: MarketId,
        side: Side,
        quantity: i64,
    ) -> LiquidationOrder {
        let id = OrderId::new(market, SessionId(0), SequenceId(self.next_local));
        self.next_local += 1;

        // Worst-extreme limit so the order crosses everything on the way
        let price = match side {
            Side::Buy => i64::MAX,
            Side::Sell => i64::MIN,
        };

        let result = matching.submit(&OrderRequest {
            id,
            account,
            side,
            quantity,
            price,
            display_quantity: 0,
            tif: TimeInForce::Ioc,
            flags: flags::REDUCE_ONLY,
        });

        // The liquidation order is IOC: always the taker of its own fills.
        for fill in &result.fills {
            risk.apply_fill(&FillContext {
                account,
                market,
                side,
                quantity: fill.quantity,
                price: fill.price,
            });
        }

        LiquidationOrder {
            account,
            market,
            side,
            quantity,
            fills: result.fills,
        }
    }
}
