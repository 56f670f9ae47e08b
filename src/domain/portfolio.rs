//! Working portfolio: a signal's cash and holdings threaded through order
//! execution.

use std::collections::{BTreeMap, HashMap};

use super::error::LedgerError;
use super::holding::Holding;
use super::stats::Stats;

/// Exclusive, transient copy of one signal's funds and holdings.
///
/// Holdings are keyed by code in a `BTreeMap` so iteration (and therefore
/// quote batches and persisted writes) is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingPortfolio {
    pub signal_id: i64,
    pub funds: f64,
    pub deposits: f64,
    pub withdrawals: f64,
    pub holdings: BTreeMap<String, Holding>,
}

impl WorkingPortfolio {
    pub fn new(signal_id: i64) -> Self {
        WorkingPortfolio {
            signal_id,
            funds: 0.0,
            deposits: 0.0,
            withdrawals: 0.0,
            holdings: BTreeMap::new(),
        }
    }

    /// Rebuild from the latest stats snapshot and the stored holdings.
    pub fn from_parts(stats: &Stats, holdings: Vec<Holding>) -> Self {
        WorkingPortfolio {
            signal_id: stats.signal_id,
            funds: stats.funds,
            deposits: stats.deposits,
            withdrawals: stats.withdrawals,
            holdings: holdings
                .into_iter()
                .map(|h| (h.code.clone(), h))
                .collect(),
        }
    }

    pub fn get_holding(&self, code: &str) -> Option<&Holding> {
        self.holdings.get(code)
    }

    pub fn holding_count(&self) -> usize {
        self.holdings.len()
    }

    pub fn codes(&self) -> Vec<String> {
        self.holdings.keys().cloned().collect()
    }

    pub fn cost_basis(&self) -> f64 {
        self.holdings.values().map(Holding::cost_value).sum()
    }

    /// Cash plus holdings at cost.
    pub fn balance(&self) -> f64 {
        self.funds + self.cost_basis()
    }

    /// Holdings valued at the given prices. Every held code must be priced.
    pub fn market_value(&self, prices: &HashMap<String, f64>) -> Result<f64, LedgerError> {
        self.holdings
            .values()
            .map(|h| {
                prices
                    .get(&h.code)
                    .map(|&price| h.market_value(price))
                    .ok_or_else(|| LedgerError::upstream(format!("no price for {}", h.code)))
            })
            .sum()
    }

    /// Cash plus holdings at market.
    pub fn equity(&self, prices: &HashMap<String, f64>) -> Result<f64, LedgerError> {
        Ok(self.funds + self.market_value(prices)?)
    }
}
