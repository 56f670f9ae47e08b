//! Signals: modeled trading strategies owning holdings, orders and stats.

use chrono::{DateTime, Utc};

use super::error::LedgerError;

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Subscription price.
    pub price: f64,
    pub num_subscribers: i64,
    pub num_trades: i64,
    pub first_trade_time: Option<DateTime<Utc>>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub growth: f64,
}

impl Signal {
    /// Widen the `[first_trade_time, last_trade_time]` window to include `time`.
    pub fn cover(&mut self, time: DateTime<Utc>) {
        match self.first_trade_time {
            Some(first) if first <= time => {}
            _ => self.first_trade_time = Some(time),
        }
        match self.last_trade_time {
            Some(last) if last >= time => {}
            _ => self.last_trade_time = Some(time),
        }
    }

    /// Count one executed trade at `time`.
    pub fn record_trade(&mut self, time: DateTime<Utc>) {
        self.num_trades += 1;
        self.cover(time);
    }
}

/// A signal as submitted for registration, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub num_subscribers: i64,
}

impl NewSignal {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        NewSignal {
            name: name.into(),
            description: String::new(),
            price,
            num_subscribers: 0,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("signal name cannot be empty"));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(LedgerError::validation(
                "signal price must be greater than 0",
            ));
        }
        if self.num_subscribers < 0 {
            return Err(LedgerError::validation(
                "subscriber count cannot be negative",
            ));
        }
        Ok(())
    }

    /// Key used for the case-insensitive uniqueness check on names.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
