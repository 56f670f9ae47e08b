//! SQLite ledger adapter.
//!
//! Each signal write unit holds one pooled connection inside a
//! `BEGIN IMMEDIATE` transaction, so SQLite admits a single writer at a time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};

use crate::domain::error::LedgerError;
use crate::domain::holding::Holding;
use crate::domain::order::{Order, OrderType};
use crate::domain::query::{HoldingField, OrderField, SignalField, Sort};
use crate::domain::signal::{NewSignal, Signal};
use crate::domain::stats::Stats;
use crate::ports::ledger_port::{LedgerPort, SignalTx};

const SIGNAL_COLUMNS: &str = "id, name, description, price, num_subscribers, num_trades, \
                              first_trade_time, last_trade_time, growth";
const HOLDING_COLUMNS: &str = "signal_id, code, name, shares, price";
const ORDER_COLUMNS: &str = "id, signal_id, order_time, type, code, name, shares, price, profit";
const STATS_COLUMNS: &str = "id, signal_id, time, deposits, withdrawals, funds, balance, \
                             equity, profit, growth, drawdown";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS signals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        name_key TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        price REAL NOT NULL,
        num_subscribers INTEGER NOT NULL DEFAULT 0,
        num_trades INTEGER NOT NULL DEFAULT 0,
        first_trade_time INTEGER,
        last_trade_time INTEGER,
        growth REAL NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS holdings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signal_id INTEGER NOT NULL,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        shares INTEGER NOT NULL CHECK (shares > 0),
        price REAL NOT NULL,
        UNIQUE (signal_id, code)
    );
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signal_id INTEGER NOT NULL,
        order_time INTEGER NOT NULL,
        type TEXT NOT NULL,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        shares INTEGER NOT NULL,
        price REAL NOT NULL,
        profit REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_orders_signal ON orders(signal_id, order_time);
    CREATE TABLE IF NOT EXISTS stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signal_id INTEGER NOT NULL,
        time INTEGER NOT NULL,
        deposits REAL NOT NULL,
        withdrawals REAL NOT NULL,
        funds REAL NOT NULL,
        balance REAL NOT NULL,
        equity REAL NOT NULL,
        profit REAL NOT NULL,
        growth REAL NOT NULL,
        drawdown REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_stats_signal_time ON stats(signal_id, time, id);";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn open(path: &str, pool_size: u32) -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_error)?;

        info!(path, pool_size, "opened sqlite ledger");
        Ok(Self { pool })
    }

    /// Single-connection in-memory ledger.
    ///
    /// Only one write unit can be open at a time, and no other ledger call
    /// may be made while it is.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(query_error)?;
        debug!("sqlite schema ready");
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, LedgerError> {
        self.pool.get().map_err(pool_error)
    }
}

impl LedgerPort for SqliteAdapter {
    fn register_signal(
        &self,
        signal: &NewSignal,
        time: DateTime<Utc>,
    ) -> Result<Signal, LedgerError> {
        signal.validate()?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_error)?;

        let taken: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM signals WHERE name_key = ?1)",
                params![signal.name_key()],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        if taken {
            return Err(LedgerError::validation(format!(
                "signal name {} is already taken",
                signal.name.trim()
            )));
        }

        tx.execute(
            "INSERT INTO signals (name, name_key, description, price, num_subscribers)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signal.name.trim(),
                signal.name_key(),
                signal.description,
                signal.price,
                signal.num_subscribers
            ],
        )
        .map_err(query_error)?;
        let id = tx.last_insert_rowid();

        insert_stats(&tx, &Stats::zero(id, time))?;
        let created = load_signal(&tx, id)?;
        tx.commit().map_err(query_error)?;

        info!(signal_id = id, name = %created.name, "signal registered");
        Ok(created)
    }

    fn signals(&self, sort: Sort<SignalField>) -> Result<Vec<Signal>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals ORDER BY {}",
            sort.order_by()
        );
        collect_rows(&conn, &sql, params![], signal_from_row)
    }

    fn signal(&self, id: i64) -> Result<Signal, LedgerError> {
        load_signal(&*self.conn()?, id)
    }

    fn delete_signal(&self, id: i64) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_error)?;

        ensure_signal(&tx, id)?;
        for sql in [
            "DELETE FROM stats WHERE signal_id = ?1",
            "DELETE FROM orders WHERE signal_id = ?1",
            "DELETE FROM holdings WHERE signal_id = ?1",
            "DELETE FROM signals WHERE id = ?1",
        ] {
            tx.execute(sql, params![id]).map_err(query_error)?;
        }
        tx.commit().map_err(query_error)?;

        info!(signal_id = id, "signal deleted");
        Ok(())
    }

    fn holdings(
        &self,
        signal_id: i64,
        sort: Sort<HoldingField>,
    ) -> Result<Vec<Holding>, LedgerError> {
        let conn = self.conn()?;
        ensure_signal(&conn, signal_id)?;
        load_holdings(&conn, signal_id, &sort.order_by())
    }

    fn orders(&self, signal_id: i64, sort: Sort<OrderField>) -> Result<Vec<Order>, LedgerError> {
        let conn = self.conn()?;
        ensure_signal(&conn, signal_id)?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE signal_id = ?1 ORDER BY {}",
            sort.order_by()
        );
        collect_rows(&conn, &sql, params![signal_id], order_from_row)
    }

    fn latest_stats(&self, signal_id: i64) -> Result<Stats, LedgerError> {
        load_latest_stats(&*self.conn()?, signal_id)
    }

    fn stats_history(&self, signal_id: i64) -> Result<Vec<Stats>, LedgerError> {
        let conn = self.conn()?;
        ensure_signal(&conn, signal_id)?;
        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM stats WHERE signal_id = ?1 ORDER BY time ASC, id ASC"
        );
        collect_rows(&conn, &sql, params![signal_id], stats_from_row)
    }

    fn begin(&self, signal_id: i64) -> Result<Box<dyn SignalTx + '_>, LedgerError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(query_error)?;

        // Rolls back on drop if the signal is missing.
        let unit = SqliteSignalTx {
            conn,
            signal_id,
            open: true,
        };
        ensure_signal(&unit.conn, signal_id)?;
        debug!(signal_id, "write unit opened");
        Ok(Box::new(unit))
    }
}

/// One signal's open `BEGIN IMMEDIATE` transaction.
struct SqliteSignalTx {
    conn: PooledConnection<SqliteConnectionManager>,
    signal_id: i64,
    open: bool,
}

impl SignalTx for SqliteSignalTx {
    fn signal(&mut self) -> Result<Signal, LedgerError> {
        load_signal(&self.conn, self.signal_id)
    }

    fn holdings(&mut self) -> Result<Vec<Holding>, LedgerError> {
        load_holdings(&self.conn, self.signal_id, "code ASC")
    }

    fn latest_stats(&mut self) -> Result<Stats, LedgerError> {
        load_latest_stats(&self.conn, self.signal_id)
    }

    fn insert_order(&mut self, order: &Order) -> Result<i64, LedgerError> {
        self.conn
            .execute(
                "INSERT INTO orders (signal_id, order_time, type, code, name, shares, price, profit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    self.signal_id,
                    order.time.timestamp(),
                    order.kind.as_str(),
                    order.code,
                    order.name,
                    order.shares,
                    order.price,
                    order.profit
                ],
            )
            .map_err(query_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert_holding(&mut self, holding: &Holding) -> Result<(), LedgerError> {
        self.conn
            .execute(
                "INSERT INTO holdings (signal_id, code, name, shares, price)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (signal_id, code) DO UPDATE SET
                     name = excluded.name,
                     shares = excluded.shares,
                     price = excluded.price",
                params![
                    self.signal_id,
                    holding.code,
                    holding.name,
                    holding.shares,
                    holding.price
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn delete_holding(&mut self, code: &str) -> Result<(), LedgerError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM holdings WHERE signal_id = ?1 AND code = ?2",
                params![self.signal_id, code],
            )
            .map_err(query_error)?;
        if deleted == 0 {
            return Err(LedgerError::not_found("holding", code));
        }
        Ok(())
    }

    fn update_signal(&mut self, signal: &Signal) -> Result<(), LedgerError> {
        self.conn
            .execute(
                "UPDATE signals
                 SET num_trades = ?2, first_trade_time = ?3, last_trade_time = ?4, growth = ?5
                 WHERE id = ?1",
                params![
                    self.signal_id,
                    signal.num_trades,
                    signal.first_trade_time.map(|t| t.timestamp()),
                    signal.last_trade_time.map(|t| t.timestamp()),
                    signal.growth
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn insert_stats(&mut self, stats: &Stats) -> Result<i64, LedgerError> {
        insert_stats(&self.conn, stats)
    }

    fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.open = false;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(query_error(e));
        }
        debug!(signal_id = self.signal_id, "write unit committed");
        Ok(())
    }
}

impl Drop for SqliteSignalTx {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
            debug!(signal_id = self.signal_id, "write unit rolled back");
        }
    }
}

fn pool_error(e: r2d2::Error) -> LedgerError {
    LedgerError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> LedgerError {
    LedgerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn collect_rows<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>, LedgerError>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    let rows = stmt.query_map(params, map).map_err(query_error)?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(query_error)?);
    }
    Ok(items)
}

fn ensure_signal(conn: &Connection, id: i64) -> Result<(), LedgerError> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM signals WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .map_err(query_error)?;
    if exists {
        Ok(())
    } else {
        Err(LedgerError::not_found("signal", id))
    }
}

fn load_signal(conn: &Connection, id: i64) -> Result<Signal, LedgerError> {
    conn.query_row(
        &format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1"),
        params![id],
        signal_from_row,
    )
    .optional()
    .map_err(query_error)?
    .ok_or_else(|| LedgerError::not_found("signal", id))
}

fn load_holdings(conn: &Connection, signal_id: i64, order_by: &str) -> Result<Vec<Holding>, LedgerError> {
    let sql = format!("SELECT {HOLDING_COLUMNS} FROM holdings WHERE signal_id = ?1 ORDER BY {order_by}");
    collect_rows(conn, &sql, params![signal_id], holding_from_row)
}

fn load_latest_stats(conn: &Connection, signal_id: i64) -> Result<Stats, LedgerError> {
    conn.query_row(
        &format!(
            "SELECT {STATS_COLUMNS} FROM stats WHERE signal_id = ?1
             ORDER BY time DESC, id DESC LIMIT 1"
        ),
        params![signal_id],
        stats_from_row,
    )
    .optional()
    .map_err(query_error)?
    .ok_or_else(|| LedgerError::not_found("stats for signal", signal_id))
}

fn insert_stats(conn: &Connection, stats: &Stats) -> Result<i64, LedgerError> {
    conn.execute(
        "INSERT INTO stats (signal_id, time, deposits, withdrawals, funds, balance, equity,
                            profit, growth, drawdown)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            stats.signal_id,
            stats.time.timestamp(),
            stats.deposits,
            stats.withdrawals,
            stats.funds,
            stats.balance,
            stats.equity,
            stats.profit,
            stats.growth,
            stats.drawdown
        ],
    )
    .map_err(query_error)?;
    Ok(conn.last_insert_rowid())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

fn optional_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<Signal> {
    Ok(Signal {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        num_subscribers: row.get(4)?,
        num_trades: row.get(5)?,
        first_trade_time: optional_time_at(row, 6)?,
        last_trade_time: optional_time_at(row, 7)?,
        growth: row.get(8)?,
    })
}

fn holding_from_row(row: &Row<'_>) -> rusqlite::Result<Holding> {
    Ok(Holding {
        signal_id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        shares: row.get(3)?,
        price: row.get(4)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let kind: String = row.get(3)?;
    let kind = kind.parse::<OrderType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Order {
        id: row.get(0)?,
        signal_id: row.get(1)?,
        time: time_at(row, 2)?,
        kind,
        code: row.get(4)?,
        name: row.get(5)?,
        shares: row.get(6)?,
        price: row.get(7)?,
        profit: row.get(8)?,
    })
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<Stats> {
    Ok(Stats {
        id: row.get(0)?,
        signal_id: row.get(1)?,
        time: time_at(row, 2)?,
        deposits: row.get(3)?,
        withdrawals: row.get(4)?,
        funds: row.get(5)?,
        balance: row.get(6)?,
        equity: row.get(7)?,
        profit: row.get(8)?,
        growth: row.get(9)?,
        drawdown: row.get(10)?,
    })
}
