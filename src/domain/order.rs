//! Orders: the append-only ledger of trades and cash movements.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Buy,
    Sell,
    Deposit,
    Withdraw,
    /// Capital injected straight into a position; counted as a deposit.
    Add,
    /// Capital taken straight out of a position; counted as a withdrawal.
    Reduce,
}

impl OrderType {
    pub const ALL: [OrderType; 6] = [
        OrderType::Buy,
        OrderType::Sell,
        OrderType::Deposit,
        OrderType::Withdraw,
        OrderType::Add,
        OrderType::Reduce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Buy => "buy",
            OrderType::Sell => "sell",
            OrderType::Deposit => "deposit",
            OrderType::Withdraw => "withdraw",
            OrderType::Add => "add",
            OrderType::Reduce => "reduce",
        }
    }

    /// Cash movements carry no instrument.
    pub fn is_cash(self) -> bool {
        matches!(self, OrderType::Deposit | OrderType::Withdraw)
    }

    pub fn is_trade(self) -> bool {
        !self.is_cash()
    }

    /// Buy and add grow a holding.
    pub fn opens(self) -> bool {
        matches!(self, OrderType::Buy | OrderType::Add)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        OrderType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| LedgerError::validation(format!("unknown order type: {s}")))
    }
}

/// Whether a stats snapshot can be valued at live market prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pricing {
    /// Stamped at execution time; equity uses current bid prices.
    Live,
    /// Backfilled with its own timestamp; equity is taken at cost.
    Historical,
}

/// A recorded ledger entry. Never updated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub signal_id: i64,
    pub time: DateTime<Utc>,
    pub kind: OrderType,
    pub code: String,
    pub name: String,
    pub shares: i64,
    pub price: f64,
    /// Realized profit for sell/reduce; the moved amount for deposit/withdraw.
    pub profit: f64,
}

impl Order {
    pub fn cash_amount(&self) -> Option<f64> {
        self.kind.is_cash().then_some(self.profit)
    }
}

/// An order as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub signal_id: i64,
    pub kind: OrderType,
    pub code: String,
    pub shares: i64,
    /// Fill price; 0 asks for the current market price.
    pub price: f64,
    /// Cash amount for deposit/withdraw.
    pub amount: f64,
    /// Absent for live orders.
    pub time: Option<DateTime<Utc>>,
}

impl NewOrder {
    pub fn trade(signal_id: i64, kind: OrderType, code: &str, shares: i64, price: f64) -> Self {
        NewOrder {
            signal_id,
            kind,
            code: code.to_string(),
            shares,
            price,
            amount: 0.0,
            time: None,
        }
    }

    pub fn cash(signal_id: i64, kind: OrderType, amount: f64) -> Self {
        NewOrder {
            signal_id,
            kind,
            code: String::new(),
            shares: 0,
            price: 0.0,
            amount,
            time: None,
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Deposit/withdraw amount, falling back to the price field.
    pub fn cash_amount(&self) -> f64 {
        if self.amount != 0.0 {
            self.amount
        } else {
            self.price
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.signal_id <= 0 {
            return Err(LedgerError::validation(format!(
                "invalid signal id {}",
                self.signal_id
            )));
        }

        if self.kind.is_cash() {
            let amount = self.cash_amount();
            if !amount.is_finite() || amount <= 0.0 {
                return Err(LedgerError::validation(format!(
                    "{} amount must be greater than 0",
                    self.kind
                )));
            }
            return Ok(());
        }

        if self.code.trim().is_empty() {
            return Err(LedgerError::validation(format!(
                "{} order requires a code",
                self.kind
            )));
        }
        if self.shares <= 0 {
            return Err(LedgerError::validation(format!(
                "{} order shares must be greater than 0",
                self.kind
            )));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(LedgerError::validation(format!(
                "{} order price cannot be negative",
                self.kind
            )));
        }
        Ok(())
    }
}

/// A validated order with its name, price and time resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOrder {
    pub signal_id: i64,
    pub kind: OrderType,
    pub code: String,
    pub name: String,
    pub shares: i64,
    pub price: f64,
    pub amount: f64,
    pub time: DateTime<Utc>,
    pub pricing: Pricing,
}

impl PreparedOrder {
    /// Notional value of a trade order.
    pub fn notional(&self) -> f64 {
        self.shares as f64 * self.price
    }
}

/// Parse an order timestamp given as RFC 3339 or unix seconds.
pub fn parse_order_time(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| LedgerError::validation(format!("timestamp out of range: {value}")));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::validation(format!("invalid order time {value}: {e}")))
}
