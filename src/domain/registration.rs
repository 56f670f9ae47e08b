//! Order registration: prepares submitted orders, then executes and persists
//! them one signal at a time inside that signal's write unit.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::error::LedgerError;
use super::execution::{HoldingChange, apply_orders};
use super::order::{NewOrder, Order, PreparedOrder, Pricing};
use super::portfolio::WorkingPortfolio;
use super::stats::{Marks, Stats, build_snapshot};
use crate::ports::ledger_port::{LedgerPort, SignalTx};
use crate::ports::quote_port::{QuotePort, bid_prices, fetch_quotes};

/// Outcome of one signal's unit within a registration call.
#[derive(Debug)]
pub struct SignalOutcome {
    pub signal_id: i64,
    /// Recorded orders with their assigned ids, or the error that rolled the
    /// unit back.
    pub result: Result<Vec<Order>, LedgerError>,
}

#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub outcomes: Vec<SignalOutcome>,
}

impl RegistrationReport {
    pub fn recorded(&self) -> impl Iterator<Item = &Order> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flatten()
    }

    /// All recorded orders, or the first failure.
    pub fn into_result(self) -> Result<Vec<Order>, LedgerError> {
        let mut orders = Vec::new();
        for outcome in self.outcomes {
            orders.extend(outcome.result?);
        }
        Ok(orders)
    }
}

/// Split orders into per-signal groups, keeping first-appearance order of the
/// signals and input order within each group.
pub fn group_by_signal(orders: Vec<NewOrder>) -> Vec<(i64, Vec<NewOrder>)> {
    let mut groups: Vec<(i64, Vec<NewOrder>)> = Vec::new();
    for order in orders {
        match groups.iter_mut().find(|(id, _)| *id == order.signal_id) {
            Some((_, group)) => group.push(order),
            None => groups.push((order.signal_id, vec![order])),
        }
    }
    groups
}

/// Validate orders and resolve their code, name, price and time.
///
/// Trade codes are quoted in one batch. A trade without a price fills at the
/// ask when opening and at the bid when closing. Orders without a time are
/// stamped `now` and valued live.
pub fn prepare_orders(
    quotes: &dyn QuotePort,
    orders: &[NewOrder],
    now: DateTime<Utc>,
) -> Result<Vec<PreparedOrder>, LedgerError> {
    for order in orders {
        order.validate()?;
    }

    let mut codes: Vec<String> = Vec::new();
    for order in orders.iter().filter(|o| o.kind.is_trade()) {
        let code = normalize_code(&order.code);
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    let quoted = if codes.is_empty() {
        Vec::new()
    } else {
        fetch_quotes(quotes, &codes)?
    };

    orders
        .iter()
        .map(|order| {
            let (time, pricing) = match order.time {
                Some(time) => (time, Pricing::Historical),
                None => (now, Pricing::Live),
            };

            if order.kind.is_cash() {
                return Ok(PreparedOrder {
                    signal_id: order.signal_id,
                    kind: order.kind,
                    code: String::new(),
                    name: String::new(),
                    shares: 0,
                    price: 0.0,
                    amount: order.cash_amount(),
                    time,
                    pricing,
                });
            }

            let code = normalize_code(&order.code);
            let quote = codes
                .iter()
                .position(|c| *c == code)
                .and_then(|i| quoted.get(i))
                .ok_or_else(|| LedgerError::upstream(format!("no quote for {code}")))?;

            let price = if order.price > 0.0 {
                order.price
            } else if order.kind.opens() {
                quote.ask
            } else {
                quote.bid
            };

            Ok(PreparedOrder {
                signal_id: order.signal_id,
                kind: order.kind,
                code,
                name: quote.name.clone(),
                shares: order.shares,
                price,
                amount: 0.0,
                time,
                pricing,
            })
        })
        .collect()
}

/// Register `orders`, committing each signal's orders as one unit.
///
/// A failure rolls back only the unit it happened in; the other signals in
/// the call are still processed.
pub fn register_orders(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    orders: Vec<NewOrder>,
    now: DateTime<Utc>,
) -> RegistrationReport {
    let mut report = RegistrationReport::default();
    for (signal_id, group) in group_by_signal(orders) {
        let result = register_signal_orders(ledger, quotes, signal_id, &group, now);
        match &result {
            Ok(recorded) => info!(signal_id, orders = recorded.len(), "orders registered"),
            Err(e) if e.is_persistence() => {
                error!(signal_id, error = %e, "order registration rolled back")
            }
            Err(e) => warn!(signal_id, error = %e, "order registration rolled back"),
        }
        report.outcomes.push(SignalOutcome { signal_id, result });
    }
    report
}

/// Register orders that all target `signal_id`, in order, as one unit.
pub fn register_signal_orders(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    signal_id: i64,
    orders: &[NewOrder],
    now: DateTime<Utc>,
) -> Result<Vec<Order>, LedgerError> {
    if let Some(stray) = orders.iter().find(|o| o.signal_id != signal_id) {
        return Err(LedgerError::validation(format!(
            "order for signal {} submitted with signal {signal_id}",
            stray.signal_id
        )));
    }
    let prepared = prepare_orders(quotes, orders, now)?;

    let mut tx = ledger.begin(signal_id)?;
    let signal = tx.signal()?;
    let mut previous = tx.latest_stats()?;
    ensure_chronological(&previous, &prepared)?;
    let portfolio = WorkingPortfolio::from_parts(&previous, tx.holdings()?);

    let executions = apply_orders(&signal, &portfolio, &prepared)?;
    let mut recorded = Vec::with_capacity(executions.len());
    let mut last_signal = signal;
    for (order, execution) in prepared.iter().zip(executions) {
        let mut stats = snapshot_after(
            quotes,
            &previous,
            &execution.portfolio,
            execution.realized_profit,
            order,
        )?;

        let mut entry = execution.order;
        entry.id = tx.insert_order(&entry)?;
        write_holding_change(tx.as_mut(), execution.holding_change)?;
        stats.id = tx.insert_stats(&stats)?;
        debug!(signal_id, order_id = entry.id, kind = %entry.kind, "order applied");

        last_signal = execution.signal;
        last_signal.growth = stats.growth;
        previous = stats;
        recorded.push(entry);
    }

    tx.update_signal(&last_signal)?;
    tx.commit()?;
    Ok(recorded)
}

/// Every order must be at or after the snapshot it builds on, so each new
/// snapshot becomes the signal's latest.
fn ensure_chronological(latest: &Stats, orders: &[PreparedOrder]) -> Result<(), LedgerError> {
    let mut floor = latest.time;
    for order in orders {
        if order.time < floor {
            return Err(LedgerError::validation(format!(
                "{} order at {} predates the signal's latest snapshot at {}",
                order.kind,
                order.time.to_rfc3339(),
                floor.to_rfc3339()
            )));
        }
        floor = order.time;
    }
    Ok(())
}

fn snapshot_after(
    quotes: &dyn QuotePort,
    previous: &Stats,
    portfolio: &WorkingPortfolio,
    realized_profit: f64,
    order: &PreparedOrder,
) -> Result<Stats, LedgerError> {
    if order.pricing == Pricing::Live && portfolio.holding_count() > 0 {
        let prices = bid_prices(quotes, &portfolio.codes())?;
        build_snapshot(
            previous,
            portfolio,
            realized_profit,
            Marks::AtMarket(&prices),
            order.time,
        )
    } else {
        build_snapshot(previous, portfolio, realized_profit, Marks::AtCost, order.time)
    }
}

fn write_holding_change(tx: &mut dyn SignalTx, change: HoldingChange) -> Result<(), LedgerError> {
    match change {
        HoldingChange::Unchanged => Ok(()),
        HoldingChange::Upsert(holding) => tx.upsert_holding(&holding),
        HoldingChange::Remove(code) => tx.delete_holding(&code),
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
