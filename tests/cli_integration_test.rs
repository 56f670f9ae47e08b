//! CLI integration tests: real INI files, a file-backed SQLite ledger and a
//! CSV quote book on disk, driven through `cli::run`.
//!
//! Tests cover:
//! - Config loading and validation failures
//! - The signal, orders, stats and sweep commands end to end
//! - Exit codes for each failure class
//!
//! `ExitCode` has no `PartialEq`, so codes are compared by their `Debug` form.

#![cfg(feature = "sqlite")]

mod common;

use approx::assert_relative_eq;
use clap::Parser;
use common::at;
use sigledger::adapters::sqlite_adapter::SqliteAdapter;
use sigledger::cli::{self, Cli};
use sigledger::domain::query::Sort;
use sigledger::ports::ledger_port::LedgerPort;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::TempDir;

fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn same_code(actual: ExitCode, expected: u8) {
    assert_eq!(format!("{actual:?}"), format!("{:?}", ExitCode::from(expected)));
}

fn success(actual: ExitCode) {
    assert_eq!(format!("{actual:?}"), format!("{:?}", ExitCode::SUCCESS));
}

/// A workspace with a ledger file, a quote book and the INI tying them together.
struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("ledger.db");
        let quotes = dir.path().join("quotes.csv");
        fs::write(
            &quotes,
            "code,name,bid,ask\nBHP,BHP Group,44.50,45.00\nCBA,Commonwealth Bank,120.00,120.50\n",
        )
        .unwrap();

        let config = dir.path().join("ledger.ini");
        fs::write(
            &config,
            format!(
                "[ledger]\nbackend = sqlite\n\n[sqlite]\npath = {}\npool_size = 2\n\n\
                 [quotes]\nsource = csv\npath = {}\n\n[log]\nfilter = warn\n",
                db.display(),
                quotes.display()
            ),
        )
        .unwrap();

        Self { dir, config }
    }

    fn run(&self, args: &[&str]) -> ExitCode {
        let mut argv = vec!["sigledger", "--config", self.config.to_str().unwrap()];
        argv.extend_from_slice(args);
        cli::run(Cli::parse_from(argv))
    }

    fn write_orders(&self, name: &str, rows: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(
            &path,
            format!("signal_id,type,code,shares,price,amount,time\n{rows}"),
        )
        .unwrap();
        path
    }

    fn set_quotes(&self, content: &str) {
        fs::write(self.dir.path().join("quotes.csv"), content).unwrap();
    }

    fn ledger(&self) -> SqliteAdapter {
        let path = self.dir.path().join("ledger.db");
        SqliteAdapter::open(path.to_str().unwrap(), 1).unwrap()
    }

    /// Register a signal whose history starts at t=1000, before every order
    /// the tests write.
    fn register_signal(&self, name: &str) {
        success(self.run(&[
            "signal", "register", "--name", name, "--price", "19.95", "--since", "1000",
        ]));
    }
}

mod config_loading {
    use super::*;

    #[test]
    fn missing_file_exits_with_config_code() {
        let code = cli::load_config(Path::new("/nonexistent/ledger.ini")).unwrap_err();
        same_code(code, 2);
    }

    #[test]
    fn valid_file_loads() {
        let file = write_temp_ini("[sqlite]\npath = /tmp/ledger.db\n");
        assert!(cli::load_config(file.path()).is_ok());
    }

    #[test]
    fn missing_sqlite_path_exits_with_config_code() {
        let file = write_temp_ini("[ledger]\nbackend = sqlite\n");
        let cli = Cli::parse_from(["sigledger", "--config", file.path().to_str().unwrap(), "init"]);
        same_code(cli::run(cli), 2);
    }

    #[test]
    fn unknown_backend_exits_with_config_code() {
        let file = write_temp_ini("[ledger]\nbackend = oracle\n");
        let cli = Cli::parse_from(["sigledger", "--config", file.path().to_str().unwrap(), "init"]);
        same_code(cli::run(cli), 2);
    }
}

mod signals {
    use super::*;

    #[test]
    fn register_and_show() {
        let ws = Workspace::new();
        success(ws.run(&["init"]));
        ws.register_signal("Momentum");

        let signals = ws.ledger().signals(Sort::default()).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "Momentum");
        assert_relative_eq!(signals[0].price, 19.95);
        assert_eq!(ws.ledger().stats_history(signals[0].id).unwrap().len(), 1);

        success(ws.run(&["signal", "show", &signals[0].id.to_string()]));
        success(ws.run(&["signal", "list", "--field", "name", "--asc"]));
    }

    #[test]
    fn duplicate_name_is_a_validation_failure() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        same_code(
            ws.run(&["signal", "register", "--name", "momentum", "--price", "5"]),
            4,
        );
    }

    #[test]
    fn unknown_signal_exits_with_not_found_code() {
        let ws = Workspace::new();
        success(ws.run(&["init"]));
        same_code(ws.run(&["signal", "show", "77"]), 4);
        same_code(ws.run(&["stats", "--signal-id", "77"]), 4);
    }

    #[test]
    fn delete_removes_the_signal() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        success(ws.run(&["signal", "delete", "1"]));
        assert!(ws.ledger().signals(Sort::default()).unwrap().is_empty());
    }

    #[test]
    fn bad_sort_field_is_a_validation_failure() {
        let ws = Workspace::new();
        same_code(ws.run(&["signal", "list", "--field", "colour"]), 4);
    }
}

mod orders {
    use super::*;

    #[test]
    fn registers_a_file_of_orders() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let file = ws.write_orders(
            "orders.csv",
            "1,deposit,,,,1000,2000\n1,buy,bhp,10,50,,2100\n1,sell,BHP,4,60,,2200\n",
        );

        success(ws.run(&["orders", "register", "--file", file.to_str().unwrap()]));

        let ledger = ws.ledger();
        let orders = ledger.orders(1, Sort::default()).unwrap();
        assert_eq!(orders.len(), 3);
        // newest first
        assert_eq!(orders[0].time, at(2_200));
        assert_relative_eq!(orders[0].profit, 40.0);

        let holdings = ledger.holdings(1, Sort::default()).unwrap();
        assert_eq!(holdings[0].code, "BHP");
        assert_eq!(holdings[0].name, "BHP Group");
        assert_eq!(holdings[0].shares, 6);

        let stats = ledger.latest_stats(1).unwrap();
        assert_relative_eq!(stats.funds, 740.0);
        assert_relative_eq!(stats.growth, 4.0);

        success(ws.run(&["orders", "list", "--signal-id", "1"]));
        success(ws.run(&["holdings", "--signal-id", "1"]));
        success(ws.run(&["stats", "--signal-id", "1", "--history"]));
    }

    #[test]
    fn orders_before_the_signal_started_are_a_validation_failure() {
        let ws = Workspace::new();
        success(ws.run(&["signal", "register", "--name", "Fresh", "--price", "5"]));
        let file = ws.write_orders("orders.csv", "1,deposit,,,,1000,2000\n");

        same_code(
            ws.run(&["orders", "register", "--file", file.to_str().unwrap()]),
            4,
        );
        let ledger = ws.ledger();
        assert!(ledger.orders(1, Sort::default()).unwrap().is_empty());
        assert_eq!(ledger.stats_history(1).unwrap().len(), 1);
    }

    #[test]
    fn since_sets_the_start_of_history() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let history = ws.ledger().stats_history(1).unwrap();
        assert_eq!(history[0].time, at(1_000));
    }

    #[test]
    fn rejected_orders_exit_with_the_failure_code() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let file = ws.write_orders("orders.csv", "1,deposit,,,,100,2000\n1,buy,BHP,10,50,,2100\n");

        same_code(
            ws.run(&["orders", "register", "--file", file.to_str().unwrap()]),
            5,
        );
        assert!(ws.ledger().orders(1, Sort::default()).unwrap().is_empty());
    }

    #[test]
    fn other_signals_still_commit_when_one_fails() {
        let ws = Workspace::new();
        ws.register_signal("Alpha");
        ws.register_signal("Beta");
        let file = ws.write_orders(
            "orders.csv",
            "1,deposit,,,,100,2000\n2,withdraw,,,,50,2000\n",
        );

        same_code(
            ws.run(&["orders", "register", "--file", file.to_str().unwrap()]),
            5,
        );
        let ledger = ws.ledger();
        assert_eq!(ledger.orders(1, Sort::default()).unwrap().len(), 1);
        assert!(ledger.orders(2, Sort::default()).unwrap().is_empty());
    }

    #[test]
    fn malformed_file_is_a_validation_failure() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let file = ws.write_orders("orders.csv", "1,short,BHP,1,1,,\n");
        same_code(
            ws.run(&["orders", "register", "--file", file.to_str().unwrap()]),
            4,
        );
    }

    #[test]
    fn missing_file_is_an_io_failure() {
        let ws = Workspace::new();
        same_code(
            ws.run(&["orders", "register", "--file", "/nonexistent/orders.csv"]),
            1,
        );
    }

    #[test]
    fn unknown_code_is_an_upstream_failure() {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let file = ws.write_orders("orders.csv", "1,deposit,,,,100,2000\n1,buy,XYZ,1,1,,2100\n");
        same_code(
            ws.run(&["orders", "register", "--file", file.to_str().unwrap()]),
            6,
        );
    }
}

mod sweep {
    use super::*;

    fn seeded() -> Workspace {
        let ws = Workspace::new();
        ws.register_signal("Momentum");
        let file = ws.write_orders("orders.csv", "1,deposit,,,,1000,2000\n1,buy,BHP,10,50,,2100\n");
        success(ws.run(&["orders", "register", "--file", file.to_str().unwrap()]));
        ws
    }

    #[test]
    fn single_pass_appends_snapshots() {
        let ws = seeded();
        let before = ws.ledger().stats_history(1).unwrap().len();

        success(ws.run(&["sweep", "--once"]));

        let ledger = ws.ledger();
        assert_eq!(ledger.stats_history(1).unwrap().len(), before + 1);
        // 500 + 10 * 44.50
        assert_relative_eq!(ledger.latest_stats(1).unwrap().equity, 945.0);
    }

    #[test]
    fn unpriceable_holding_exits_with_upstream_code() {
        let ws = seeded();
        ws.set_quotes("code,name,bid,ask\nCBA,Commonwealth Bank,120.00,120.50\n");
        same_code(ws.run(&["sweep", "--once"]), 6);
    }

    #[test]
    fn portfolio_view_records_nothing() {
        let ws = seeded();
        let before = ws.ledger().stats_history(1).unwrap();
        success(ws.run(&["portfolio", "--signal-id", "1", "--field", "shares"]));
        assert_eq!(ws.ledger().stats_history(1).unwrap(), before);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let ws = seeded();
        same_code(ws.run(&["sweep", "--interval-secs", "0"]), 4);
    }
}
