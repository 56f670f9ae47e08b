//! Periodic re-valuation: one fresh snapshot per signal at current prices,
//! with no order recorded.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::error::LedgerError;
use super::portfolio::WorkingPortfolio;
use super::query::Sort;
use super::stats::{Marks, Stats, build_snapshot};
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::{QuotePort, bid_prices};

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Signals that received a new snapshot.
    pub refreshed: Vec<i64>,
    pub failures: Vec<(i64, LedgerError)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Append a snapshot for `signal_id` valued at current bid prices.
///
/// The snapshot is stamped `now`, or the latest snapshot's time when that is
/// later, so it always becomes the latest.
pub fn revalue_signal(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    signal_id: i64,
    now: DateTime<Utc>,
) -> Result<Stats, LedgerError> {
    let mut tx = ledger.begin(signal_id)?;
    let previous = tx.latest_stats()?;
    let portfolio = WorkingPortfolio::from_parts(&previous, tx.holdings()?);
    let time = now.max(previous.time);

    let mut stats = if portfolio.holding_count() == 0 {
        build_snapshot(&previous, &portfolio, 0.0, Marks::AtCost, time)?
    } else {
        let prices = bid_prices(quotes, &portfolio.codes())?;
        build_snapshot(&previous, &portfolio, 0.0, Marks::AtMarket(&prices), time)?
    };

    stats.id = tx.insert_stats(&stats)?;
    tx.commit()?;
    Ok(stats)
}

/// Re-value every signal. A failing signal is recorded in the report and the
/// sweep moves on; only failing to list the signals aborts it.
pub fn sweep(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    now: DateTime<Utc>,
) -> Result<SweepReport, LedgerError> {
    let signals = ledger.signals(Sort::default())?;
    let mut report = SweepReport::default();

    for signal in signals {
        match revalue_signal(ledger, quotes, signal.id, now) {
            Ok(_) => report.refreshed.push(signal.id),
            Err(e) => {
                if e.is_persistence() {
                    error!(signal_id = signal.id, error = %e, "re-valuation failed");
                } else {
                    warn!(signal_id = signal.id, error = %e, "re-valuation failed");
                }
                report.failures.push((signal.id, e));
            }
        }
    }

    info!(
        refreshed = report.refreshed.len(),
        failed = report.failures.len(),
        "sweep finished"
    );
    Ok(report)
}
