//! PostgreSQL ledger adapter.
//!
//! A signal write unit locks the signal row with `SELECT ... FOR UPDATE`, so
//! concurrent units for the same signal queue behind each other while units
//! for different signals proceed.

use chrono::{DateTime, Utc};
use postgres::types::{FromSql, ToSql};
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::{debug, info};

use crate::domain::error::LedgerError;
use crate::domain::holding::Holding;
use crate::domain::order::{Order, OrderType};
use crate::domain::query::{HoldingField, OrderField, SignalField, Sort};
use crate::domain::signal::{NewSignal, Signal};
use crate::domain::stats::Stats;
use crate::ports::ledger_port::{LedgerPort, SignalTx};

type Manager = PostgresConnectionManager<NoTls>;

const SIGNAL_COLUMNS: &str = "id, name, description, price, num_subscribers, num_trades, \
                              first_trade_time, last_trade_time, growth";
const HOLDING_COLUMNS: &str = "signal_id, code, name, shares, price";
const ORDER_COLUMNS: &str = "id, signal_id, order_time, type, code, name, shares, price, profit";
const STATS_COLUMNS: &str = "id, signal_id, time, deposits, withdrawals, funds, balance, \
                             equity, profit, growth, drawdown";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS signals (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        name_key TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        price DOUBLE PRECISION NOT NULL,
        num_subscribers BIGINT NOT NULL DEFAULT 0,
        num_trades BIGINT NOT NULL DEFAULT 0,
        first_trade_time BIGINT,
        last_trade_time BIGINT,
        growth DOUBLE PRECISION NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS holdings (
        id BIGSERIAL PRIMARY KEY,
        signal_id BIGINT NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        shares BIGINT NOT NULL CHECK (shares > 0),
        price DOUBLE PRECISION NOT NULL,
        UNIQUE (signal_id, code)
    );
    CREATE TABLE IF NOT EXISTS orders (
        id BIGSERIAL PRIMARY KEY,
        signal_id BIGINT NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
        order_time BIGINT NOT NULL,
        type TEXT NOT NULL,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        shares BIGINT NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        profit DOUBLE PRECISION NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_orders_signal ON orders(signal_id, order_time);
    CREATE TABLE IF NOT EXISTS stats (
        id BIGSERIAL PRIMARY KEY,
        signal_id BIGINT NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
        time BIGINT NOT NULL,
        deposits DOUBLE PRECISION NOT NULL,
        withdrawals DOUBLE PRECISION NOT NULL,
        funds DOUBLE PRECISION NOT NULL,
        balance DOUBLE PRECISION NOT NULL,
        equity DOUBLE PRECISION NOT NULL,
        profit DOUBLE PRECISION NOT NULL,
        growth DOUBLE PRECISION NOT NULL,
        drawdown DOUBLE PRECISION NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_stats_signal_time ON stats(signal_id, time, id);";

pub struct PostgresAdapter {
    pool: Pool<Manager>,
}

impl PostgresAdapter {
    pub fn connect(conninfo: &str, pool_size: u32) -> Result<Self, LedgerError> {
        let config = conninfo
            .parse::<postgres::Config>()
            .map_err(|e| LedgerError::Database {
                reason: e.to_string(),
            })?;
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(PostgresConnectionManager::new(config, NoTls))
            .map_err(pool_error)?;

        info!(pool_size, "connected to postgres ledger");
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), LedgerError> {
        self.conn()?.batch_execute(SCHEMA).map_err(query_error)?;
        debug!("postgres schema ready");
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, LedgerError> {
        self.pool.get().map_err(pool_error)
    }
}

impl LedgerPort for PostgresAdapter {
    fn register_signal(
        &self,
        signal: &NewSignal,
        time: DateTime<Utc>,
    ) -> Result<Signal, LedgerError> {
        signal.validate()?;

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_error)?;

        let taken: bool = tx
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM signals WHERE name_key = $1)",
                &[&signal.name_key()],
            )
            .and_then(|row| row.try_get(0))
            .map_err(query_error)?;
        if taken {
            return Err(LedgerError::validation(format!(
                "signal name {} is already taken",
                signal.name.trim()
            )));
        }

        let id: i64 = tx
            .query_one(
                "INSERT INTO signals (name, name_key, description, price, num_subscribers)
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &signal.name.trim(),
                    &signal.name_key(),
                    &signal.description,
                    &signal.price,
                    &signal.num_subscribers,
                ],
            )
            .and_then(|row| row.try_get(0))
            .map_err(query_error)?;

        insert_stats(&mut tx, &Stats::zero(id, time))?;
        let created = load_signal(&mut tx, id)?;
        tx.commit().map_err(query_error)?;

        info!(signal_id = id, name = %created.name, "signal registered");
        Ok(created)
    }

    fn signals(&self, sort: Sort<SignalField>) -> Result<Vec<Signal>, LedgerError> {
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals ORDER BY {}",
            sort.order_by()
        );
        collect_rows(&mut *self.conn()?, &sql, &[], signal_from_row)
    }

    fn signal(&self, id: i64) -> Result<Signal, LedgerError> {
        load_signal(&mut *self.conn()?, id)
    }

    fn delete_signal(&self, id: i64) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_error)?;
        let deleted = tx
            .execute("DELETE FROM signals WHERE id = $1", &[&id])
            .map_err(query_error)?;
        if deleted == 0 {
            return Err(LedgerError::not_found("signal", id));
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
        let mut conn = self.conn()?;
        ensure_signal(&mut *conn, signal_id)?;
        load_holdings(&mut *conn, signal_id, &sort.order_by())
    }

    fn orders(&self, signal_id: i64, sort: Sort<OrderField>) -> Result<Vec<Order>, LedgerError> {
        let mut conn = self.conn()?;
        ensure_signal(&mut *conn, signal_id)?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE signal_id = $1 ORDER BY {}",
            sort.order_by()
        );
        collect_rows(&mut *conn, &sql, &[&signal_id], order_from_row)
    }

    fn latest_stats(&self, signal_id: i64) -> Result<Stats, LedgerError> {
        load_latest_stats(&mut *self.conn()?, signal_id)
    }

    fn stats_history(&self, signal_id: i64) -> Result<Vec<Stats>, LedgerError> {
        let mut conn = self.conn()?;
        ensure_signal(&mut *conn, signal_id)?;
        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM stats WHERE signal_id = $1 ORDER BY time ASC, id ASC"
        );
        collect_rows(&mut *conn, &sql, &[&signal_id], stats_from_row)
    }

    fn begin(&self, signal_id: i64) -> Result<Box<dyn SignalTx + '_>, LedgerError> {
        let mut conn = self.conn()?;
        conn.batch_execute("BEGIN").map_err(query_error)?;

        let mut unit = PostgresSignalTx {
            conn,
            signal_id,
            open: true,
        };
        let locked = unit
            .conn
            .query_opt(
                "SELECT id FROM signals WHERE id = $1 FOR UPDATE",
                &[&signal_id],
            )
            .map_err(query_error)?;
        if locked.is_none() {
            return Err(LedgerError::not_found("signal", signal_id));
        }
        debug!(signal_id, "write unit opened");
        Ok(Box::new(unit))
    }
}

/// One signal's open transaction, holding the signal row lock.
struct PostgresSignalTx {
    conn: PooledConnection<Manager>,
    signal_id: i64,
    open: bool,
}

impl SignalTx for PostgresSignalTx {
    fn signal(&mut self) -> Result<Signal, LedgerError> {
        load_signal(&mut *self.conn, self.signal_id)
    }

    fn holdings(&mut self) -> Result<Vec<Holding>, LedgerError> {
        load_holdings(&mut *self.conn, self.signal_id, "code ASC")
    }

    fn latest_stats(&mut self) -> Result<Stats, LedgerError> {
        load_latest_stats(&mut *self.conn, self.signal_id)
    }

    fn insert_order(&mut self, order: &Order) -> Result<i64, LedgerError> {
        self.conn
            .query_one(
                "INSERT INTO orders (signal_id, order_time, type, code, name, shares, price, profit)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
                &[
                    &self.signal_id,
                    &order.time.timestamp(),
                    &order.kind.as_str(),
                    &order.code,
                    &order.name,
                    &order.shares,
                    &order.price,
                    &order.profit,
                ],
            )
            .and_then(|row| row.try_get(0))
            .map_err(query_error)
    }

    fn upsert_holding(&mut self, holding: &Holding) -> Result<(), LedgerError> {
        self.conn
            .execute(
                "INSERT INTO holdings (signal_id, code, name, shares, price)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (signal_id, code) DO UPDATE SET
                     name = EXCLUDED.name,
                     shares = EXCLUDED.shares,
                     price = EXCLUDED.price",
                &[
                    &self.signal_id,
                    &holding.code,
                    &holding.name,
                    &holding.shares,
                    &holding.price,
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn delete_holding(&mut self, code: &str) -> Result<(), LedgerError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM holdings WHERE signal_id = $1 AND code = $2",
                &[&self.signal_id, &code],
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
                 SET num_trades = $2, first_trade_time = $3, last_trade_time = $4, growth = $5
                 WHERE id = $1",
                &[
                    &self.signal_id,
                    &signal.num_trades,
                    &signal.first_trade_time.map(|t| t.timestamp()),
                    &signal.last_trade_time.map(|t| t.timestamp()),
                    &signal.growth,
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn insert_stats(&mut self, stats: &Stats) -> Result<i64, LedgerError> {
        insert_stats(&mut *self.conn, stats)
    }

    fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.open = false;
        if let Err(e) = self.conn.batch_execute("COMMIT") {
            let _ = self.conn.batch_execute("ROLLBACK");
            return Err(query_error(e));
        }
        debug!(signal_id = self.signal_id, "write unit committed");
        Ok(())
    }
}

impl Drop for PostgresSignalTx {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.batch_execute("ROLLBACK");
            debug!(signal_id = self.signal_id, "write unit rolled back");
        }
    }
}

fn pool_error(e: r2d2::Error) -> LedgerError {
    LedgerError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: postgres::Error) -> LedgerError {
    LedgerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn collect_rows<C, T, F>(
    client: &mut C,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
    map: F,
) -> Result<Vec<T>, LedgerError>
where
    C: postgres::GenericClient,
    F: Fn(&Row) -> Result<T, LedgerError>,
{
    client
        .query(sql, params)
        .map_err(query_error)?
        .iter()
        .map(map)
        .collect()
}

fn ensure_signal<C: postgres::GenericClient>(client: &mut C, id: i64) -> Result<(), LedgerError> {
    let row = client
        .query_opt("SELECT id FROM signals WHERE id = $1", &[&id])
        .map_err(query_error)?;
    match row {
        Some(_) => Ok(()),
        None => Err(LedgerError::not_found("signal", id)),
    }
}

fn load_signal<C: postgres::GenericClient>(client: &mut C, id: i64) -> Result<Signal, LedgerError> {
    let row = client
        .query_opt(
            &format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = $1"),
            &[&id],
        )
        .map_err(query_error)?
        .ok_or_else(|| LedgerError::not_found("signal", id))?;
    signal_from_row(&row)
}

fn load_holdings<C: postgres::GenericClient>(
    client: &mut C,
    signal_id: i64,
    order_by: &str,
) -> Result<Vec<Holding>, LedgerError> {
    let sql = format!("SELECT {HOLDING_COLUMNS} FROM holdings WHERE signal_id = $1 ORDER BY {order_by}");
    collect_rows(client, &sql, &[&signal_id], holding_from_row)
}

fn load_latest_stats<C: postgres::GenericClient>(
    client: &mut C,
    signal_id: i64,
) -> Result<Stats, LedgerError> {
    let row = client
        .query_opt(
            &format!(
                "SELECT {STATS_COLUMNS} FROM stats WHERE signal_id = $1
                 ORDER BY time DESC, id DESC LIMIT 1"
            ),
            &[&signal_id],
        )
        .map_err(query_error)?
        .ok_or_else(|| LedgerError::not_found("stats for signal", signal_id))?;
    stats_from_row(&row)
}

fn insert_stats<C: postgres::GenericClient>(client: &mut C, stats: &Stats) -> Result<i64, LedgerError> {
    client
        .query_one(
            "INSERT INTO stats (signal_id, time, deposits, withdrawals, funds, balance, equity,
                                profit, growth, drawdown)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
            &[
                &stats.signal_id,
                &stats.time.timestamp(),
                &stats.deposits,
                &stats.withdrawals,
                &stats.funds,
                &stats.balance,
                &stats.equity,
                &stats.profit,
                &stats.growth,
                &stats.drawdown,
            ],
        )
        .and_then(|row| row.try_get(0))
        .map_err(query_error)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<T, LedgerError> {
    row.try_get(idx).map_err(query_error)
}

fn time_at(row: &Row, idx: usize) -> Result<DateTime<Utc>, LedgerError> {
    let secs: i64 = get(row, idx)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| LedgerError::DatabaseQuery {
        reason: format!("timestamp {secs} out of range"),
    })
}

fn optional_time_at(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>, LedgerError> {
    match get::<Option<i64>>(row, idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn signal_from_row(row: &Row) -> Result<Signal, LedgerError> {
    Ok(Signal {
        id: get(row, 0)?,
        name: get(row, 1)?,
        description: get(row, 2)?,
        price: get(row, 3)?,
        num_subscribers: get(row, 4)?,
        num_trades: get(row, 5)?,
        first_trade_time: optional_time_at(row, 6)?,
        last_trade_time: optional_time_at(row, 7)?,
        growth: get(row, 8)?,
    })
}

fn holding_from_row(row: &Row) -> Result<Holding, LedgerError> {
    Ok(Holding {
        signal_id: get(row, 0)?,
        code: get(row, 1)?,
        name: get(row, 2)?,
        shares: get(row, 3)?,
        price: get(row, 4)?,
    })
}

fn order_from_row(row: &Row) -> Result<Order, LedgerError> {
    let kind: String = get(row, 3)?;
    Ok(Order {
        id: get(row, 0)?,
        signal_id: get(row, 1)?,
        time: time_at(row, 2)?,
        kind: kind.parse::<OrderType>().map_err(|e| LedgerError::DatabaseQuery {
            reason: e.to_string(),
        })?,
        code: get(row, 4)?,
        name: get(row, 5)?,
        shares: get(row, 6)?,
        price: get(row, 7)?,
        profit: get(row, 8)?,
    })
}

fn stats_from_row(row: &Row) -> Result<Stats, LedgerError> {
    Ok(Stats {
        id: get(row, 0)?,
        signal_id: get(row, 1)?,
        time: time_at(row, 2)?,
        deposits: get(row, 3)?,
        withdrawals: get(row, 4)?,
        funds: get(row, 5)?,
        balance: get(row, 6)?,
        equity: get(row, 7)?,
        profit: get(row, 8)?,
        growth: get(row, 9)?,
        drawdown: get(row, 10)?,
    })
}
