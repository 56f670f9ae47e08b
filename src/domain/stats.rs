//! Stats snapshots and the arithmetic that builds them.
//!
//! A snapshot is an immutable valuation record. A new one is appended after
//! every order and on every re-valuation sweep; "latest" is the maximum
//! `(time, id)`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::error::LedgerError;
use super::portfolio::WorkingPortfolio;

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub id: i64,
    pub signal_id: i64,
    pub time: DateTime<Utc>,
    pub deposits: f64,
    pub withdrawals: f64,
    /// Cash.
    pub funds: f64,
    /// Cash plus holdings at cost.
    pub balance: f64,
    /// Cash plus holdings at market.
    pub equity: f64,
    /// Cumulative realized profit.
    pub profit: f64,
    /// Cumulative growth in percent.
    pub growth: f64,
    /// Percent shortfall of equity below balance.
    pub drawdown: f64,
}

impl Stats {
    /// Snapshot of a signal that has never seen an order.
    pub fn zero(signal_id: i64, time: DateTime<Utc>) -> Self {
        Stats {
            id: 0,
            signal_id,
            time,
            deposits: 0.0,
            withdrawals: 0.0,
            funds: 0.0,
            balance: 0.0,
            equity: 0.0,
            profit: 0.0,
            growth: 0.0,
            drawdown: 0.0,
        }
    }
}

/// How holdings are valued for equity.
#[derive(Debug, Clone, Copy)]
pub enum Marks<'a> {
    /// Current bid price per code.
    AtMarket(&'a HashMap<String, f64>),
    /// No market data for the instant; equity equals balance.
    AtCost,
}

/// Round half-up on the hundredths digit.
///
/// Halves round toward positive infinity for negative values too, so
/// `-0.125` becomes `-0.12`. Negative drawdowns and gains in the portfolio
/// view depend on this.
pub fn round2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

/// `numerator * 100 / denominator`, or 0 when the denominator is 0.
pub fn percent_of(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator * 100.0 / denominator
    }
}

/// Build the snapshot that follows `previous` once `portfolio` reflects the
/// latest order (or none, for a sweep).
///
/// `realized_profit` is non-zero only after a sell or reduce. Its growth
/// contribution is measured against `previous.balance`, the balance just
/// before the order, and added onto the running growth.
pub fn build_snapshot(
    previous: &Stats,
    portfolio: &WorkingPortfolio,
    realized_profit: f64,
    marks: Marks<'_>,
    time: DateTime<Utc>,
) -> Result<Stats, LedgerError> {
    let balance = portfolio.balance();
    let equity = match marks {
        Marks::AtMarket(prices) => portfolio.equity(prices)?,
        Marks::AtCost => balance,
    };

    let drawdown = round2(percent_of(balance - equity, balance));
    let growth_delta = round2(percent_of(realized_profit, previous.balance));

    Ok(Stats {
        id: 0,
        signal_id: portfolio.signal_id,
        time,
        deposits: portfolio.deposits,
        withdrawals: portfolio.withdrawals,
        funds: portfolio.funds,
        balance,
        equity,
        profit: previous.profit + realized_profit,
        growth: previous.growth + growth_delta,
        drawdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::holding::Holding;
    use approx::assert_relative_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn portfolio_with(funds: f64, holdings: &[(&str, i64, f64)]) -> WorkingPortfolio {
        let mut p = WorkingPortfolio::new(1);
        p.funds = funds;
        for &(code, shares, price) in holdings {
            p.holdings
                .insert(code.to_string(), Holding::open(1, code, code, shares, price));
        }
        p
    }

    #[test]
    fn round2_is_half_up() {
        assert_relative_eq!(round2(60.0), 60.0);
        assert_relative_eq!(round2(12.344), 12.34);
        assert_relative_eq!(round2(12.346), 12.35);
        assert_relative_eq!(round2(0.125), 0.13);
    }

    #[test]
    fn negative_halves_round_toward_positive_infinity() {
        assert_relative_eq!(round2(-0.125), -0.12);
        assert_relative_eq!(round2(-0.375), -0.37);
        assert_relative_eq!(round2(-0.625), -0.62);
        assert_relative_eq!(round2(-12.346), -12.35);
    }

    #[test]
    fn percent_of_guards_zero_denominator() {
        assert_relative_eq!(percent_of(300.0, 0.0), 0.0);
        assert_relative_eq!(percent_of(30.0, 50.0), 60.0);
    }

    #[test]
    fn at_cost_snapshot_has_equity_equal_to_balance() {
        let previous = Stats::zero(1, t0());
        let portfolio = portfolio_with(500.0, &[("BHP", 10, 50.0)]);

        let stats = build_snapshot(&previous, &portfolio, 0.0, Marks::AtCost, t0()).unwrap();

        assert_relative_eq!(stats.balance, 1_000.0);
        assert_relative_eq!(stats.equity, 1_000.0);
        assert_relative_eq!(stats.drawdown, 0.0);
    }

    #[test]
    fn live_snapshot_prices_holdings_at_market() {
        let previous = Stats::zero(1, t0());
        let portfolio = portfolio_with(500.0, &[("BHP", 10, 50.0)]);
        let prices = HashMap::from([("BHP".to_string(), 40.0)]);

        let stats =
            build_snapshot(&previous, &portfolio, 0.0, Marks::AtMarket(&prices), t0()).unwrap();

        assert_relative_eq!(stats.balance, 1_000.0);
        assert_relative_eq!(stats.equity, 900.0);
        // (1000 - 900) * 100 / 1000
        assert_relative_eq!(stats.drawdown, 10.0);
    }

    #[test]
    fn drawdown_is_zero_for_zero_balance() {
        let previous = Stats::zero(1, t0());
        let portfolio = WorkingPortfolio::new(1);
        let stats = build_snapshot(&previous, &portfolio, 0.0, Marks::AtCost, t0()).unwrap();
        assert_relative_eq!(stats.drawdown, 0.0);
        assert_relative_eq!(stats.growth, 0.0);
    }

    #[test]
    fn growth_accumulates_against_previous_balance() {
        let previous = Stats {
            balance: 1_000.0,
            growth: 5.0,
            profit: 50.0,
            ..Stats::zero(1, t0())
        };
        let portfolio = portfolio_with(1_300.0, &[]);

        let stats = build_snapshot(&previous, &portfolio, 300.0, Marks::AtCost, t0()).unwrap();

        assert_relative_eq!(stats.profit, 350.0);
        // 5 + 300 * 100 / 1000
        assert_relative_eq!(stats.growth, 35.0);
    }

    #[test]
    fn growth_contribution_is_zero_without_previous_balance() {
        let previous = Stats::zero(1, t0());
        let portfolio = portfolio_with(300.0, &[]);
        let stats = build_snapshot(&previous, &portfolio, 300.0, Marks::AtCost, t0()).unwrap();
        assert_relative_eq!(stats.growth, 0.0);
        assert_relative_eq!(stats.profit, 300.0);
    }

    #[test]
    fn growth_delta_is_rounded() {
        let previous = Stats {
            balance: 3_000.0,
            ..Stats::zero(1, t0())
        };
        let portfolio = portfolio_with(3_100.0, &[]);
        let stats = build_snapshot(&previous, &portfolio, 100.0, Marks::AtCost, t0()).unwrap();
        // 100 * 100 / 3000 = 3.333...
        assert_relative_eq!(stats.growth, 3.33);
    }

    #[test]
    fn missing_price_fails_the_snapshot() {
        let previous = Stats::zero(1, t0());
        let portfolio = portfolio_with(0.0, &[("BHP", 1, 1.0)]);
        let prices = HashMap::new();
        let result = build_snapshot(&previous, &portfolio, 0.0, Marks::AtMarket(&prices), t0());
        assert!(matches!(result, Err(LedgerError::UpstreamQuote { .. })));
    }
}
