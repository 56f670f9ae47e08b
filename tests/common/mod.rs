#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use sigledger::adapters::sqlite_adapter::SqliteAdapter;
use sigledger::domain::error::LedgerError;
use sigledger::domain::holding::Holding;
use sigledger::domain::order::Order;
use sigledger::domain::query::{HoldingField, OrderField, SignalField, Sort};
use sigledger::domain::signal::{NewSignal, Signal};
use sigledger::domain::stats::Stats;
use sigledger::ports::ledger_port::{LedgerPort, SignalTx};
use sigledger::ports::quote_port::{Quote, QuotePort};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

pub struct MockQuotePort {
    pub quotes: RefCell<HashMap<String, Quote>>,
    pub failing: HashSet<String>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl MockQuotePort {
    pub fn new() -> Self {
        Self {
            quotes: RefCell::new(HashMap::new()),
            failing: HashSet::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_quote(self, code: &str, name: &str, bid: f64, ask: f64) -> Self {
        self.quotes.borrow_mut().insert(
            code.to_string(),
            Quote {
                code: code.to_string(),
                name: name.to_string(),
                bid,
                ask,
            },
        );
        self
    }

    pub fn with_error(mut self, code: &str) -> Self {
        self.failing.insert(code.to_string());
        self
    }

    /// Move the market for `code`; bid and ask both change.
    pub fn set_price(&self, code: &str, bid: f64, ask: f64) {
        if let Some(quote) = self.quotes.borrow_mut().get_mut(code) {
            quote.bid = bid;
            quote.ask = ask;
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl QuotePort for MockQuotePort {
    fn quotes(&self, codes: &[String]) -> Result<Vec<Quote>, LedgerError> {
        self.calls.borrow_mut().push(codes.to_vec());
        let book = self.quotes.borrow();
        codes
            .iter()
            .map(|code| {
                if self.failing.contains(code) {
                    return Err(LedgerError::upstream(format!("{code} cannot be priced")));
                }
                book.get(code)
                    .cloned()
                    .ok_or_else(|| LedgerError::upstream(format!("no quote for {code}")))
            })
            .collect()
    }
}

/// BHP and CBA with a 0.50 spread.
pub fn market() -> MockQuotePort {
    MockQuotePort::new()
        .with_quote("BHP", "BHP Group", 44.5, 45.0)
        .with_quote("CBA", "Commonwealth Bank", 120.0, 120.5)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn ledger() -> SqliteAdapter {
    let ledger = SqliteAdapter::in_memory().unwrap();
    ledger.initialize_schema().unwrap();
    ledger
}

pub fn new_signal(ledger: &dyn LedgerPort, name: &str) -> Signal {
    ledger
        .register_signal(&NewSignal::new(name, 9.99), at(1_000))
        .unwrap()
}

/// Ledger whose write units fail the Nth `insert_stats` call, counted across
/// every unit opened through it.
pub struct FlakyLedger {
    pub inner: SqliteAdapter,
    fail_on: usize,
    stats_inserts: Cell<usize>,
}

impl FlakyLedger {
    pub fn failing_stats_insert(inner: SqliteAdapter, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            stats_inserts: Cell::new(0),
        }
    }
}

impl LedgerPort for FlakyLedger {
    fn register_signal(
        &self,
        signal: &NewSignal,
        time: DateTime<Utc>,
    ) -> Result<Signal, LedgerError> {
        self.inner.register_signal(signal, time)
    }

    fn signals(&self, sort: Sort<SignalField>) -> Result<Vec<Signal>, LedgerError> {
        self.inner.signals(sort)
    }

    fn signal(&self, id: i64) -> Result<Signal, LedgerError> {
        self.inner.signal(id)
    }

    fn delete_signal(&self, id: i64) -> Result<(), LedgerError> {
        self.inner.delete_signal(id)
    }

    fn holdings(
        &self,
        signal_id: i64,
        sort: Sort<HoldingField>,
    ) -> Result<Vec<Holding>, LedgerError> {
        self.inner.holdings(signal_id, sort)
    }

    fn orders(&self, signal_id: i64, sort: Sort<OrderField>) -> Result<Vec<Order>, LedgerError> {
        self.inner.orders(signal_id, sort)
    }

    fn latest_stats(&self, signal_id: i64) -> Result<Stats, LedgerError> {
        self.inner.latest_stats(signal_id)
    }

    fn stats_history(&self, signal_id: i64) -> Result<Vec<Stats>, LedgerError> {
        self.inner.stats_history(signal_id)
    }

    fn begin(&self, signal_id: i64) -> Result<Box<dyn SignalTx + '_>, LedgerError> {
        let inner = self.inner.begin(signal_id)?;
        Ok(Box::new(FlakyTx {
            inner,
            fail_on: self.fail_on,
            stats_inserts: &self.stats_inserts,
        }))
    }
}

pub struct FlakyTx<'a> {
    inner: Box<dyn SignalTx + 'a>,
    fail_on: usize,
    stats_inserts: &'a Cell<usize>,
}

impl SignalTx for FlakyTx<'_> {
    fn signal(&mut self) -> Result<Signal, LedgerError> {
        self.inner.signal()
    }

    fn holdings(&mut self) -> Result<Vec<Holding>, LedgerError> {
        self.inner.holdings()
    }

    fn latest_stats(&mut self) -> Result<Stats, LedgerError> {
        self.inner.latest_stats()
    }

    fn insert_order(&mut self, order: &Order) -> Result<i64, LedgerError> {
        self.inner.insert_order(order)
    }

    fn upsert_holding(&mut self, holding: &Holding) -> Result<(), LedgerError> {
        self.inner.upsert_holding(holding)
    }

    fn delete_holding(&mut self, code: &str) -> Result<(), LedgerError> {
        self.inner.delete_holding(code)
    }

    fn update_signal(&mut self, signal: &Signal) -> Result<(), LedgerError> {
        self.inner.update_signal(signal)
    }

    fn insert_stats(&mut self, stats: &Stats) -> Result<i64, LedgerError> {
        let count = self.stats_inserts.get() + 1;
        self.stats_inserts.set(count);
        if count == self.fail_on {
            return Err(LedgerError::DatabaseQuery {
                reason: "disk I/O error".to_string(),
            });
        }
        self.inner.insert_stats(stats)
    }

    fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let tx = *self;
        tx.inner.commit()
    }
}
