//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::adapters::csv_adapter::{CsvQuoteAdapter, read_orders};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::{
    QuoteSettings, StorageSettings, log_filter, validate_ledger_config, validate_quote_config,
    validate_sweep_config,
};
use crate::domain::error::LedgerError;
use crate::domain::holding::Holding;
use crate::domain::order::{Order, parse_order_time};
use crate::domain::query::{HoldingField, OrderField, SignalField, Sort, SortField};
use crate::domain::registration::register_orders;
use crate::domain::signal::{NewSignal, Signal};
use crate::domain::stats::Stats;
use crate::domain::sweep::{SweepReport, sweep};
use crate::domain::valuation::{PortfolioView, portfolio_view};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::QuotePort;

#[derive(Parser, Debug)]
#[command(name = "sigledger", about = "Trading signal ledger")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the ledger schema
    Init,
    /// Register, list, show or delete signals
    Signal {
        #[command(subcommand)]
        action: SignalCommand,
    },
    /// Register or list orders
    Orders {
        #[command(subcommand)]
        action: OrdersCommand,
    },
    /// List a signal's holdings
    Holdings {
        #[arg(long)]
        signal_id: i64,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Show a signal's latest stats snapshot, or its full history
    Stats {
        #[arg(long)]
        signal_id: i64,
        #[arg(long)]
        history: bool,
    },
    /// Value a signal's holdings at current prices without recording anything
    Portfolio {
        #[arg(long)]
        signal_id: i64,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Append a fresh stats snapshot for every signal
    Sweep {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Seconds between passes; overrides [sweep] interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SignalCommand {
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        subscribers: i64,
        /// Start of the signal's history (epoch seconds or RFC 3339); orders
        /// may not predate it. Defaults to now.
        #[arg(long)]
        since: Option<String>,
    },
    List {
        #[command(flatten)]
        sort: SortArgs,
    },
    Show {
        id: i64,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrdersCommand {
    /// Register orders from a CSV file
    Register {
        #[arg(short, long)]
        file: PathBuf,
    },
    List {
        #[arg(long)]
        signal_id: i64,
        #[command(flatten)]
        sort: SortArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SortArgs {
    /// Field to sort by; without it the default order applies
    #[arg(long)]
    pub field: Option<String>,
    /// Sort ascending instead of descending
    #[arg(long)]
    pub asc: bool,
}

impl SortArgs {
    fn resolve<F: SortField>(&self, default: Sort<F>) -> Result<Sort<F>, LedgerError> {
        match self.field.as_deref() {
            None => Ok(default),
            field => Sort::parse(field, self.asc, default.field),
        }
    }

    fn holdings(&self) -> Result<Sort<HoldingField>, LedgerError> {
        self.resolve(Sort::default())
    }

    fn orders(&self) -> Result<Sort<OrderField>, LedgerError> {
        self.resolve(Sort::default())
    }

    fn signals(&self) -> Result<Sort<SignalField>, LedgerError> {
        self.resolve(Sort::default())
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_tracing(&log_filter(&config));
    debug!(config = config.source(), "configuration loaded");

    match dispatch(&config, cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Diagnostics go to stderr; `RUST_LOG` wins over the configured filter.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn dispatch(config: &dyn ConfigPort, command: Command) -> Result<ExitCode, LedgerError> {
    let ledger = open_ledger(config)?;
    let ledger = ledger.as_ref();

    match command {
        Command::Init => {
            eprintln!("Ledger schema ready");
        }
        Command::Signal { action } => run_signal(ledger, action)?,
        Command::Orders {
            action: OrdersCommand::Register { file },
        } => {
            let quotes = open_quotes(config)?;
            return run_register_orders(ledger, quotes.as_ref(), &file);
        }
        Command::Orders {
            action: OrdersCommand::List { signal_id, sort },
        } => print_orders(&ledger.orders(signal_id, sort.orders()?)?),
        Command::Holdings { signal_id, sort } => {
            print_holdings(&ledger.holdings(signal_id, sort.holdings()?)?)
        }
        Command::Stats { signal_id, history } => {
            if history {
                print_stats(&ledger.stats_history(signal_id)?);
            } else {
                print_stats(&[ledger.latest_stats(signal_id)?]);
            }
        }
        Command::Portfolio { signal_id, sort } => {
            let quotes = open_quotes(config)?;
            let view = portfolio_view(ledger, quotes.as_ref(), signal_id, sort.holdings()?)?;
            print_portfolio(&view);
        }
        Command::Sweep {
            once,
            interval_secs,
        } => {
            let quotes = open_quotes(config)?;
            let interval = match interval_secs {
                Some(0) => {
                    return Err(LedgerError::validation("interval must be positive"));
                }
                Some(secs) => secs,
                None => validate_sweep_config(config)?,
            };
            return run_sweep(ledger, quotes.as_ref(), once, Duration::from_secs(interval));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_signal(ledger: &dyn LedgerPort, action: SignalCommand) -> Result<(), LedgerError> {
    match action {
        SignalCommand::Register {
            name,
            price,
            description,
            subscribers,
            since,
        } => {
            let signal = NewSignal {
                name,
                description,
                price,
                num_subscribers: subscribers,
            };
            let since = match since {
                Some(value) => parse_order_time(&value)?.trunc_subsecs(0),
                None => now(),
            };
            let created = ledger.register_signal(&signal, since)?;
            print_signals(&[created]);
        }
        SignalCommand::List { sort } => print_signals(&ledger.signals(sort.signals()?)?),
        SignalCommand::Show { id } => print_signals(&[ledger.signal(id)?]),
        SignalCommand::Delete { id } => {
            ledger.delete_signal(id)?;
            eprintln!("Signal {id} deleted");
        }
    }
    Ok(())
}

fn run_register_orders(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    file: &Path,
) -> Result<ExitCode, LedgerError> {
    eprintln!("Loading orders from {}", file.display());
    let orders = read_orders(file)?;
    let report = register_orders(ledger, quotes, orders, now());

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(orders) => eprintln!(
                "  signal {}: {} orders recorded",
                outcome.signal_id,
                orders.len()
            ),
            Err(e) => eprintln!("  signal {}: rolled back: {e}", outcome.signal_id),
        }
    }
    let recorded: Vec<Order> = report.recorded().cloned().collect();
    print_orders(&recorded);

    Ok(match report.into_result() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => (&e).into(),
    })
}

fn run_sweep(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    once: bool,
    interval: Duration,
) -> Result<ExitCode, LedgerError> {
    if once {
        let report = sweep(ledger, quotes, now())?;
        print_sweep(&report);
        return Ok(if report.is_clean() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(6)
        });
    }

    info!(interval_secs = interval.as_secs(), "sweep loop started");
    loop {
        match sweep(ledger, quotes, now()) {
            Ok(report) => print_sweep(&report),
            Err(e) => warn!(error = %e, "sweep pass failed"),
        }
        thread::sleep(interval);
    }
}

fn open_ledger(config: &dyn ConfigPort) -> Result<Box<dyn LedgerPort>, LedgerError> {
    match validate_ledger_config(config)? {
        StorageSettings::Sqlite { path, pool_size } => open_sqlite(&path, pool_size),
        StorageSettings::Postgres {
            conninfo,
            pool_size,
        } => open_postgres(&conninfo, pool_size),
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &str, pool_size: u32) -> Result<Box<dyn LedgerPort>, LedgerError> {
    let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::open(path, pool_size)?;
    adapter.initialize_schema()?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &str, _pool_size: u32) -> Result<Box<dyn LedgerPort>, LedgerError> {
    Err(unsupported("ledger", "backend", "sqlite"))
}

#[cfg(feature = "postgres")]
fn open_postgres(conninfo: &str, pool_size: u32) -> Result<Box<dyn LedgerPort>, LedgerError> {
    let adapter = crate::adapters::postgres_adapter::PostgresAdapter::connect(conninfo, pool_size)?;
    adapter.initialize_schema()?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_conninfo: &str, _pool_size: u32) -> Result<Box<dyn LedgerPort>, LedgerError> {
    Err(unsupported("ledger", "backend", "postgres"))
}

fn open_quotes(config: &dyn ConfigPort) -> Result<Box<dyn QuotePort>, LedgerError> {
    match validate_quote_config(config)? {
        QuoteSettings::Csv { path } => Ok(Box::new(CsvQuoteAdapter::new(path))),
        QuoteSettings::Http { url, timeout_secs } => open_http_quotes(&url, timeout_secs),
    }
}

#[cfg(feature = "http-quotes")]
fn open_http_quotes(url: &str, timeout_secs: u64) -> Result<Box<dyn QuotePort>, LedgerError> {
    let adapter = crate::adapters::http_quote_adapter::HttpQuoteAdapter::new(url, timeout_secs)?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "http-quotes"))]
fn open_http_quotes(_url: &str, _timeout_secs: u64) -> Result<Box<dyn QuotePort>, LedgerError> {
    Err(unsupported("quotes", "source", "http-quotes"))
}

#[allow(dead_code)]
fn unsupported(section: &str, key: &str, feature: &str) -> LedgerError {
    LedgerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("built without the {feature} feature"),
    }
}

/// Current time at whole-second precision, matching what the ledger stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn fmt_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn print_signals(signals: &[Signal]) {
    println!(
        "{:>5}  {:<24} {:>9} {:>6} {:>6} {:>9}  {:<20}  {:<20}",
        "ID", "NAME", "PRICE", "SUBS", "TRADES", "GROWTH%", "FIRST TRADE", "LAST TRADE"
    );
    for s in signals {
        println!(
            "{:>5}  {:<24} {:>9.2} {:>6} {:>6} {:>9.2}  {:<20}  {:<20}",
            s.id,
            s.name,
            s.price,
            s.num_subscribers,
            s.num_trades,
            s.growth,
            fmt_time(s.first_trade_time),
            fmt_time(s.last_trade_time),
        );
    }
}

fn print_holdings(holdings: &[Holding]) {
    println!("{:<8} {:<28} {:>10} {:>12}", "CODE", "NAME", "SHARES", "COST");
    for h in holdings {
        println!(
            "{:<8} {:<28} {:>10} {:>12.4}",
            h.code, h.name, h.shares, h.price
        );
    }
}

fn print_orders(orders: &[Order]) {
    println!(
        "{:>6}  {:<20}  {:<8} {:<8} {:>8} {:>12} {:>12}",
        "ID", "TIME", "TYPE", "CODE", "SHARES", "PRICE", "PROFIT"
    );
    for o in orders {
        println!(
            "{:>6}  {:<20}  {:<8} {:<8} {:>8} {:>12.4} {:>12.2}",
            o.id,
            fmt_time(Some(o.time)),
            o.kind,
            o.code,
            o.shares,
            o.price,
            o.profit,
        );
    }
}

fn print_stats(stats: &[Stats]) {
    println!(
        "{:<20}  {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>9} {:>9}",
        "TIME", "DEPOSITS", "WITHDRAWALS", "FUNDS", "BALANCE", "EQUITY", "PROFIT", "GROWTH%",
        "DRAWDOWN%"
    );
    for s in stats {
        println!(
            "{:<20}  {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>9.2} {:>9.2}",
            fmt_time(Some(s.time)),
            s.deposits,
            s.withdrawals,
            s.funds,
            s.balance,
            s.equity,
            s.profit,
            s.growth,
            s.drawdown,
        );
    }
}

fn print_portfolio(view: &PortfolioView) {
    println!(
        "{:<8} {:<28} {:>10} {:>12} {:>12} {:>9} {:>9}",
        "CODE", "NAME", "SHARES", "COST", "MARKET", "GAIN%", "RATIO%"
    );
    for h in &view.holdings {
        println!(
            "{:<8} {:<28} {:>10} {:>12.4} {:>12.4} {:>9.2} {:>9.2}",
            h.holding.code,
            h.holding.name,
            h.holding.shares,
            h.holding.price,
            h.market_price,
            h.gain,
            h.ratio,
        );
    }
    println!();
    println!("Funds:     {:.2}", view.stats.funds);
    println!("Balance:   {:.2}", view.stats.balance);
    println!("Equity:    {:.2}", view.stats.equity);
    println!("Gain:      {:.2}%", view.gain);
    println!("Growth:    {:.2}%", view.stats.growth);
    println!("Drawdown:  {:.2}%", view.stats.drawdown);
}

fn print_sweep(report: &SweepReport) {
    println!(
        "Sweep: {} signals refreshed, {} failed",
        report.refreshed.len(),
        report.failures.len()
    );
    for (signal_id, e) in &report.failures {
        println!("  signal {signal_id}: {e}");
    }
}
