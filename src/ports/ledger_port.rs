//! Persistence port traits: read surfaces and the per-signal write unit.

use chrono::{DateTime, Utc};

use crate::domain::error::LedgerError;
use crate::domain::holding::Holding;
use crate::domain::order::Order;
use crate::domain::query::{HoldingField, OrderField, SignalField, Sort};
use crate::domain::signal::{NewSignal, Signal};
use crate::domain::stats::Stats;

pub trait LedgerPort {
    /// Insert a signal together with its zero-state stats snapshot.
    fn register_signal(
        &self,
        signal: &NewSignal,
        time: DateTime<Utc>,
    ) -> Result<Signal, LedgerError>;

    fn signals(&self, sort: Sort<SignalField>) -> Result<Vec<Signal>, LedgerError>;

    fn signal(&self, id: i64) -> Result<Signal, LedgerError>;

    /// Remove a signal with its holdings, orders and stats.
    fn delete_signal(&self, id: i64) -> Result<(), LedgerError>;

    fn holdings(
        &self,
        signal_id: i64,
        sort: Sort<HoldingField>,
    ) -> Result<Vec<Holding>, LedgerError>;

    fn orders(&self, signal_id: i64, sort: Sort<OrderField>) -> Result<Vec<Order>, LedgerError>;

    /// Snapshot with the greatest `(time, id)`.
    fn latest_stats(&self, signal_id: i64) -> Result<Stats, LedgerError>;

    /// Every snapshot in `(time, id)` order.
    fn stats_history(&self, signal_id: i64) -> Result<Vec<Stats>, LedgerError>;

    /// Open the exclusive write unit for one signal.
    ///
    /// At most one unit per signal is in flight at a time; a second caller
    /// waits (or fails) until the first commits or rolls back. Fails with
    /// `NotFound` when the signal does not exist.
    fn begin(&self, signal_id: i64) -> Result<Box<dyn SignalTx + '_>, LedgerError>;
}

/// All-or-nothing mutations of one signal.
///
/// Dropping a unit without calling [`SignalTx::commit`] rolls it back.
pub trait SignalTx {
    fn signal(&mut self) -> Result<Signal, LedgerError>;

    fn holdings(&mut self) -> Result<Vec<Holding>, LedgerError>;

    fn latest_stats(&mut self) -> Result<Stats, LedgerError>;

    /// Append an order; returns its id.
    fn insert_order(&mut self, order: &Order) -> Result<i64, LedgerError>;

    fn upsert_holding(&mut self, holding: &Holding) -> Result<(), LedgerError>;

    fn delete_holding(&mut self, code: &str) -> Result<(), LedgerError>;

    /// Persist trade counters, trade-time bounds and growth.
    fn update_signal(&mut self, signal: &Signal) -> Result<(), LedgerError>;

    /// Append a snapshot; returns its id.
    fn insert_stats(&mut self, stats: &Stats) -> Result<i64, LedgerError>;

    fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
