//! Funding settlement sweep
//!
//! For each market with a nonzero accumulator, every account holding a
//! position pays (or receives) `position_qty * accumulator * contract_size
//! / 10000`; the accumulator then rolls to zero. Longs pay when funding is
//! positive, shorts receive, and vice versa.

use crate::engine::FundingEngine;
use risk::RiskEngine;
use tracing::debug;
use types::ids::{AccountId, MarketId};

const BASIS_POINT_DENOMINATOR: i64 = 10_000;

/// One settled funding transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPayment {
    pub account: AccountId,
    pub market: MarketId,
    /// Amount debited from collateral; negative = credited.
    pub payment: i64,
    /// Accumulated rate (bp·s) settled by this payment.
    pub funding_rate: i64,
}

/// Settle accrued funding across the given markets.
pub fn apply_funding(
    risk: &mut RiskEngine,
    funding: &mut FundingEngine,
    markets: &[MarketId],
) -> Vec<FundingPayment> {
    let mut payments = Vec::new();

    for &market in markets {
        let accumulated = funding.accumulated_funding(market);
        if accumulated == 0 {
            continue;
        }

        let Some(market_config) = risk.market_config(market) else {
            continue;
        };
        let contract_size = market_config.contract_size;

        for account in risk.account_ids() {
            let position_qty = risk.position(account, market).quantity;
            if position_qty == 0 {
                continue;
            }

            let payment =
                (position_qty * accumulated * contract_size) / BASIS_POINT_DENOMINATOR;
            risk.credit_collateral(account, -payment);
            debug!(%account, %market, payment, "funding settled");

            payments.push(FundingPayment {
                account,
                market,
                payment,
                funding_rate: accumulated,
            });
        }

        funding.reset_accumulated_funding(market);
    }

    payments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MarketFundingConfig;
    use risk::{FillContext, MarketRiskConfig};
    use types::order::Side;

    fn setup() -> (RiskEngine, FundingEngine) {
        let mut risk = RiskEngine::new();
        risk.configure_market(
            MarketId(1),
            MarketRiskConfig {
                contract_size: 1,
                initial_margin_bp: 500,
                maintenance_margin_bp: 300,
            },
        );
        risk.set_mark_price(MarketId(1), 1_000);

        let mut funding = FundingEngine::new();
        funding.configure_market(
            MarketId(1),
            MarketFundingConfig {
                clamp_bp: 50,
                max_rate_bp: 100,
            },
        );
        (risk, funding)
    }

    fn open_position(risk: &mut RiskEngine, account: u64, side: Side, quantity: i64) {
        risk.credit_collateral(AccountId(account), 1_000_000);
        risk.apply_fill(&FillContext {
            account: AccountId(account),
            market: MarketId(1),
            side,
            quantity,
            price: 1_000,
        });
    }

    #[test]
    fn test_longs_pay_shorts_receive() {
        let (mut risk, mut funding) = setup();
        open_position(&mut risk, 1, Side::Buy, 2_000);
        open_position(&mut risk, 2, Side::Sell, 2_000);
        funding.update_market(MarketId(1), 1_000, 1_020, 1); // +50bp·s

        let payments = apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        assert_eq!(payments.len(), 2);

        let long = payments.iter().find(|p| p.account == AccountId(1)).unwrap();
        let short = payments.iter().find(|p| p.account == AccountId(2)).unwrap();
        assert_eq!(long.payment, 10);
        assert_eq!(short.payment, -10);
        assert_eq!(funding.accumulated_funding(MarketId(1)), 0);
    }

    #[test]
    fn test_payment_amounts() {
        let (mut risk, mut funding) = setup();
        open_position(&mut risk, 1, Side::Buy, 10_000);
        open_position(&mut risk, 2, Side::Sell, 10_000);
        funding.update_market(MarketId(1), 1_000, 1_020, 1); // +50bp·s

        let payments = apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        // 10000 * 50 / 10000 = 50 per side
        let long = payments.iter().find(|p| p.account == AccountId(1)).unwrap();
        let short = payments.iter().find(|p| p.account == AccountId(2)).unwrap();
        assert_eq!(long.payment, 50);
        assert_eq!(short.payment, -50);

        assert_eq!(
            risk.find_account(AccountId(1)).unwrap().collateral,
            1_000_000 - 50
        );
        assert_eq!(
            risk.find_account(AccountId(2)).unwrap().collateral,
            1_000_000 + 50
        );
    }

    #[test]
    fn test_zero_accumulator_is_noop() {
        let (mut risk, mut funding) = setup();
        open_position(&mut risk, 1, Side::Buy, 100);
        let payments = apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        assert!(payments.is_empty());
    }

    #[test]
    fn test_flat_accounts_skipped() {
        let (mut risk, mut funding) = setup();
        risk.credit_collateral(AccountId(3), 500);
        funding.update_market(MarketId(1), 1_000, 1_020, 1);
        let payments = apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        assert!(payments.is_empty());
        assert_eq!(risk.find_account(AccountId(3)).unwrap().collateral, 500);
    }

    #[test]
    fn test_accumulator_resets_after_sweep() {
        let (mut risk, mut funding) = setup();
        open_position(&mut risk, 1, Side::Buy, 10_000);
        funding.update_market(MarketId(1), 1_000, 1_020, 1);

        apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        let second = apply_funding(&mut risk, &mut funding, &[MarketId(1)]);
        assert!(second.is_empty());
    }
}
