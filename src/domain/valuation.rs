//! Read-only portfolio view: holdings and the latest snapshot overlaid with
//! live gain and weight figures. Nothing here is persisted.

use std::collections::HashMap;

use super::error::LedgerError;
use super::holding::Holding;
use super::query::{HoldingField, Sort};
use super::stats::{Stats, percent_of, round2};
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::{QuotePort, bid_prices};

#[derive(Debug, Clone, PartialEq)]
pub struct HoldingView {
    pub holding: Holding,
    pub market_price: f64,
    pub market_value: f64,
    /// Unrealized gain over cost, in percent.
    pub gain: f64,
    /// Share of the total market value, in percent.
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioView {
    /// Latest snapshot with equity, growth and drawdown overlaid.
    pub stats: Stats,
    /// Aggregate unrealized gain over balance, in percent.
    pub gain: f64,
    pub holdings: Vec<HoldingView>,
}

/// Value `holdings` at `prices` on top of the latest snapshot.
pub fn value_portfolio(
    latest: &Stats,
    holdings: Vec<Holding>,
    prices: &HashMap<String, f64>,
) -> Result<PortfolioView, LedgerError> {
    let priced = holdings
        .into_iter()
        .map(|holding| {
            let price = prices
                .get(&holding.code)
                .copied()
                .ok_or_else(|| LedgerError::upstream(format!("no price for {}", holding.code)))?;
            Ok((holding, price))
        })
        .collect::<Result<Vec<_>, LedgerError>>()?;

    let total_market: f64 = priced.iter().map(|(h, p)| h.market_value(*p)).sum();

    let views = priced
        .into_iter()
        .map(|(holding, market_price)| {
            let market_value = holding.market_value(market_price);
            HoldingView {
                gain: round2(percent_of(market_price - holding.price, holding.price)),
                ratio: round2(percent_of(market_value, total_market)),
                market_price,
                market_value,
                holding,
            }
        })
        .collect();

    let equity = total_market + latest.funds;
    let gain = round2(percent_of(equity - latest.balance, latest.balance));

    let mut stats = latest.clone();
    stats.equity = equity;
    stats.growth += gain;
    stats.drawdown = -gain;

    Ok(PortfolioView {
        stats,
        gain,
        holdings: views,
    })
}

/// Load a signal's holdings and latest snapshot and value them at current
/// bid prices. Quotes are only requested when something is held.
pub fn portfolio_view(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    signal_id: i64,
    sort: Sort<HoldingField>,
) -> Result<PortfolioView, LedgerError> {
    ledger.signal(signal_id)?;
    let latest = ledger.latest_stats(signal_id)?;
    let holdings = ledger.holdings(signal_id, sort)?;

    let prices = if holdings.is_empty() {
        HashMap::new()
    } else {
        let codes: Vec<String> = holdings.iter().map(|h| h.code.clone()).collect();
        bid_prices(quotes, &codes)?
    };

    value_portfolio(&latest, holdings, &prices)
}
