//! Order execution: the per-type rules that move cash and shares.
//!
//! Each function validates first and only then produces an updated copy of
//! the working portfolio, so a rejected order leaves its input untouched.

use super::error::LedgerError;
use super::holding::Holding;
use super::order::{Order, OrderType, PreparedOrder};
use super::portfolio::WorkingPortfolio;
use super::signal::Signal;

/// What an order did to the holdings table.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingChange {
    Unchanged,
    /// Insert the holding, or replace the stored row for its code.
    Upsert(Holding),
    /// The holding reached 0 shares and must be deleted.
    Remove(String),
}

/// Result of applying one order.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub portfolio: WorkingPortfolio,
    pub signal: Signal,
    /// Ledger entry to record; its id is assigned on insert.
    pub order: Order,
    pub holding_change: HoldingChange,
    pub realized_profit: f64,
}

/// Apply `order` to a signal's working state.
pub fn apply_order(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    order: &PreparedOrder,
) -> Result<Execution, LedgerError> {
    if order.signal_id != signal.id || portfolio.signal_id != signal.id {
        return Err(LedgerError::validation(format!(
            "order for signal {} applied to signal {}",
            order.signal_id, signal.id
        )));
    }

    match order.kind {
        OrderType::Deposit => execute_deposit(signal, portfolio, order),
        OrderType::Withdraw => execute_withdraw(signal, portfolio, order),
        OrderType::Buy | OrderType::Add => execute_open(signal, portfolio, order),
        OrderType::Sell | OrderType::Reduce => execute_close(signal, portfolio, order),
    }
}

/// Apply `orders` in sequence, each seeing the effects of the ones before.
///
/// Stops at the first rejected order. Registration runs every batch through
/// this before it writes anything.
pub fn apply_orders(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    orders: &[PreparedOrder],
) -> Result<Vec<Execution>, LedgerError> {
    let mut executions: Vec<Execution> = Vec::with_capacity(orders.len());
    for order in orders {
        let (signal, portfolio) = match executions.last() {
            Some(prev) => (&prev.signal, &prev.portfolio),
            None => (signal, portfolio),
        };
        let execution = apply_order(signal, portfolio, order)?;
        executions.push(execution);
    }
    Ok(executions)
}

fn cash_record(order: &PreparedOrder, amount: f64) -> Order {
    Order {
        id: 0,
        signal_id: order.signal_id,
        time: order.time,
        kind: order.kind,
        code: String::new(),
        name: String::new(),
        shares: 0,
        price: 0.0,
        profit: amount,
    }
}

fn trade_record(order: &PreparedOrder, name: &str, profit: f64) -> Order {
    Order {
        id: 0,
        signal_id: order.signal_id,
        time: order.time,
        kind: order.kind,
        code: order.code.clone(),
        name: name.to_string(),
        shares: order.shares,
        price: order.price,
        profit,
    }
}

fn execute_deposit(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    order: &PreparedOrder,
) -> Result<Execution, LedgerError> {
    let amount = order.amount;

    let mut portfolio = portfolio.clone();
    portfolio.funds += amount;
    portfolio.deposits += amount;

    let mut signal = signal.clone();
    signal.cover(order.time);

    Ok(Execution {
        portfolio,
        signal,
        order: cash_record(order, amount),
        holding_change: HoldingChange::Unchanged,
        realized_profit: 0.0,
    })
}

fn execute_withdraw(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    order: &PreparedOrder,
) -> Result<Execution, LedgerError> {
    let amount = order.amount;
    if amount > portfolio.funds {
        return Err(LedgerError::InsufficientFunds {
            signal_id: signal.id,
            required: amount,
            available: portfolio.funds,
        });
    }

    let mut portfolio = portfolio.clone();
    portfolio.funds -= amount;
    portfolio.withdrawals += amount;

    let mut signal = signal.clone();
    signal.cover(order.time);

    Ok(Execution {
        portfolio,
        signal,
        order: cash_record(order, amount),
        holding_change: HoldingChange::Unchanged,
        realized_profit: 0.0,
    })
}

/// Buy or add: grow (or open) the holding at weighted-average cost.
fn execute_open(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    order: &PreparedOrder,
) -> Result<Execution, LedgerError> {
    let notional = order.notional();
    if order.kind == OrderType::Buy && notional > portfolio.funds {
        return Err(LedgerError::InsufficientFunds {
            signal_id: signal.id,
            required: notional,
            available: portfolio.funds,
        });
    }

    let mut portfolio = portfolio.clone();
    let holding = match portfolio.holdings.get_mut(&order.code) {
        Some(holding) => {
            holding.absorb(order.shares, order.price)?;
            holding.clone()
        }
        None => {
            let holding = Holding::open(
                signal.id,
                &order.code,
                &order.name,
                order.shares,
                order.price,
            );
            portfolio
                .holdings
                .insert(order.code.clone(), holding.clone());
            holding
        }
    };

    match order.kind {
        OrderType::Buy => portfolio.funds -= notional,
        _ => portfolio.deposits += notional,
    }

    let mut signal = signal.clone();
    signal.record_trade(order.time);

    Ok(Execution {
        portfolio,
        signal,
        order: trade_record(order, &order.name, 0.0),
        holding_change: HoldingChange::Upsert(holding),
        realized_profit: 0.0,
    })
}

/// Sell or reduce: shrink the holding and realize profit against its cost.
fn execute_close(
    signal: &Signal,
    portfolio: &WorkingPortfolio,
    order: &PreparedOrder,
) -> Result<Execution, LedgerError> {
    let held = portfolio
        .get_holding(&order.code)
        .map(|h| h.shares)
        .unwrap_or(0);
    if held == 0 || order.shares > held {
        return Err(LedgerError::InsufficientHoldings {
            signal_id: signal.id,
            code: order.code.clone(),
            requested: order.shares,
            held,
        });
    }

    let mut portfolio = portfolio.clone();
    let Some(holding) = portfolio.holdings.get_mut(&order.code) else {
        return Err(LedgerError::not_found("holding", &order.code));
    };
    let profit = holding.release(order.shares, order.price);
    let name = if order.name.is_empty() {
        holding.name.clone()
    } else {
        order.name.clone()
    };

    let holding_change = if holding.is_closed() {
        portfolio.holdings.remove(&order.code);
        HoldingChange::Remove(order.code.clone())
    } else {
        HoldingChange::Upsert(holding.clone())
    };

    let notional = order.notional();
    match order.kind {
        OrderType::Sell => portfolio.funds += notional,
        _ => portfolio.withdrawals += notional,
    }

    let mut signal = signal.clone();
    signal.record_trade(order.time);

    Ok(Execution {
        portfolio,
        signal,
        order: trade_record(order, &name, profit),
        holding_change,
        realized_profit: profit,
    })
}
