//! Configuration validation.
//!
//! Every key is checked before an adapter is built from it. Storage settings
//! are needed by every command; quote and sweep settings only by the commands
//! that price holdings or run the sweep.

use std::str::FromStr;

use crate::domain::error::LedgerError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_POOL_SIZE: u32 = 4;
pub const DEFAULT_QUOTE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Sqlite { path: String, pool_size: u32 },
    Postgres { conninfo: String, pool_size: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteSettings {
    Csv { path: String },
    Http { url: String, timeout_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Sqlite,
    Postgres,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(format!("unknown backend {other}, expected sqlite or postgres")),
        }
    }
}

pub fn validate_ledger_config(config: &dyn ConfigPort) -> Result<StorageSettings, LedgerError> {
    let backend = match config.get_string("ledger", "backend") {
        None => Backend::Sqlite,
        Some(value) => value.parse().map_err(|reason| invalid("ledger", "backend", reason))?,
    };

    match backend {
        Backend::Sqlite => Ok(StorageSettings::Sqlite {
            path: required(config, "sqlite", "path")?,
            pool_size: pool_size(config, "sqlite")?,
        }),
        Backend::Postgres => {
            let conninfo = match config.get_string("postgres", "connection_string") {
                Some(value) => value,
                None => config.get_string("database", "conninfo").ok_or_else(|| {
                    LedgerError::ConfigMissing {
                        section: "postgres".to_string(),
                        key: "connection_string".to_string(),
                    }
                })?,
            };
            Ok(StorageSettings::Postgres {
                conninfo,
                pool_size: pool_size(config, "postgres")?,
            })
        }
    }
}

pub fn validate_quote_config(config: &dyn ConfigPort) -> Result<QuoteSettings, LedgerError> {
    let source = config
        .get_string("quotes", "source")
        .unwrap_or_else(|| "csv".to_string());

    match source.trim().to_lowercase().as_str() {
        "csv" => Ok(QuoteSettings::Csv {
            path: required(config, "quotes", "path")?,
        }),
        "http" => {
            let url = required(config, "quotes", "url")?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("quotes", "url", "url must start with http:// or https://"));
            }
            let timeout_secs = positive(config, "quotes", "timeout_secs", DEFAULT_QUOTE_TIMEOUT_SECS)?;
            Ok(QuoteSettings::Http { url, timeout_secs })
        }
        other => Err(invalid(
            "quotes",
            "source",
            format!("unknown quote source {other}, expected csv or http"),
        )),
    }
}

/// Sweep interval in seconds.
pub fn validate_sweep_config(config: &dyn ConfigPort) -> Result<u64, LedgerError> {
    positive(config, "sweep", "interval_secs", DEFAULT_SWEEP_INTERVAL_SECS)
}

pub fn log_filter(config: &dyn ConfigPort) -> String {
    config.get_string("log", "filter").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

fn pool_size(config: &dyn ConfigPort, section: &str) -> Result<u32, LedgerError> {
    let size = positive(config, section, "pool_size", u64::from(DEFAULT_POOL_SIZE))?;
    u32::try_from(size).map_err(|_| invalid(section, "pool_size", "pool_size is too large"))
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, LedgerError> {
    config.get_string(section, key).ok_or_else(|| LedgerError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u64,
) -> Result<u64, LedgerError> {
    match config.get_u64(section, key)? {
        None => Ok(default),
        Some(0) => Err(invalid(section, key, format!("{key} must be positive"))),
        Some(n) => Ok(n),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> LedgerError {
    LedgerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn sqlite_is_the_default_backend() {
        let config = make_config("[sqlite]\npath = /tmp/ledger.db\n");
        assert_eq!(
            validate_ledger_config(&config).unwrap(),
            StorageSettings::Sqlite {
                path: "/tmp/ledger.db".into(),
                pool_size: DEFAULT_POOL_SIZE,
            }
        );
    }

    #[test]
    fn sqlite_requires_path() {
        let config = make_config("[ledger]\nbackend = sqlite\n");
        let err = validate_ledger_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigMissing { key, .. } if key == "path"));
    }

    #[test]
    fn unknown_backend_fails() {
        let config = make_config("[ledger]\nbackend = mongo\n");
        let err = validate_ledger_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigInvalid { key, .. } if key == "backend"));
    }

    #[test]
    fn postgres_falls_back_to_database_conninfo() {
        let config = make_config(
            "[ledger]\nbackend = postgres\n[database]\nconninfo = host=localhost dbname=ledger\n",
        );
        assert_eq!(
            validate_ledger_config(&config).unwrap(),
            StorageSettings::Postgres {
                conninfo: "host=localhost dbname=ledger".into(),
                pool_size: DEFAULT_POOL_SIZE,
            }
        );
    }

    #[test]
    fn postgres_without_conninfo_fails() {
        let config = make_config("[ledger]\nbackend = postgres\n");
        let err = validate_ledger_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigMissing { key, .. } if key == "connection_string"));
    }

    #[test]
    fn zero_pool_size_fails() {
        let config = make_config("[sqlite]\npath = x.db\npool_size = 0\n");
        let err = validate_ledger_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigInvalid { key, .. } if key == "pool_size"));
    }

    #[test]
    fn malformed_pool_size_fails() {
        let config = make_config("[sqlite]\npath = x.db\npool_size = lots\n");
        assert!(validate_ledger_config(&config).is_err());
    }

    #[test]
    fn csv_quotes_need_a_path() {
        let config = make_config("[quotes]\nsource = csv\n");
        let err = validate_quote_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigMissing { section, .. } if section == "quotes"));
    }

    #[test]
    fn http_quotes_default_timeout() {
        let config = make_config("[quotes]\nsource = http\nurl = https://quotes.example.com/q\n");
        assert_eq!(
            validate_quote_config(&config).unwrap(),
            QuoteSettings::Http {
                url: "https://quotes.example.com/q".into(),
                timeout_secs: DEFAULT_QUOTE_TIMEOUT_SECS,
            }
        );
    }

    #[test]
    fn http_quotes_reject_other_schemes() {
        let config = make_config("[quotes]\nsource = http\nurl = ftp://quotes\n");
        let err = validate_quote_config(&config).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigInvalid { key, .. } if key == "url"));
    }

    #[test]
    fn unknown_quote_source_fails() {
        let config = make_config("[quotes]\nsource = telepathy\n");
        assert!(validate_quote_config(&config).is_err());
    }

    #[test]
    fn sweep_interval_defaults_and_must_be_positive() {
        assert_eq!(
            validate_sweep_config(&make_config("")).unwrap(),
            DEFAULT_SWEEP_INTERVAL_SECS
        );
        assert_eq!(
            validate_sweep_config(&make_config("[sweep]\ninterval_secs = 60\n")).unwrap(),
            60
        );
        let err = validate_sweep_config(&make_config("[sweep]\ninterval_secs = 0\n")).unwrap_err();
        assert!(matches!(err, LedgerError::ConfigInvalid { key, .. } if key == "interval_secs"));
    }

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(&make_config("")), "info");
        assert_eq!(
            log_filter(&make_config("[log]\nfilter = sigledger=debug\n")),
            "sigledger=debug"
        );
    }
}
