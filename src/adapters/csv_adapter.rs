//! CSV file adapters: a quote snapshot provider and the order batch reader.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::domain::error::LedgerError;
use crate::domain::order::{NewOrder, OrderType, parse_order_time};
use crate::ports::quote_port::{Quote, QuotePort};

/// Quotes read from a `code,name,bid,ask` file.
///
/// The file is re-read on every request so a long-running sweep sees updates.
pub struct CsvQuoteAdapter {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct QuoteRecord {
    code: String,
    name: String,
    bid: f64,
    ask: f64,
}

impl CsvQuoteAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, Quote>, LedgerError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            LedgerError::upstream(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut quotes = HashMap::new();
        for result in rdr.deserialize::<QuoteRecord>() {
            let record =
                result.map_err(|e| LedgerError::upstream(format!("quote file parse error: {e}")))?;
            let code = record.code.to_uppercase();
            quotes.insert(
                code.clone(),
                Quote {
                    code,
                    name: record.name,
                    bid: record.bid,
                    ask: record.ask,
                },
            );
        }
        Ok(quotes)
    }
}

impl QuotePort for CsvQuoteAdapter {
    fn quotes(&self, codes: &[String]) -> Result<Vec<Quote>, LedgerError> {
        let book = self.load()?;
        debug!(path = %self.path.display(), codes = codes.len(), "quotes requested");
        codes
            .iter()
            .map(|code| {
                book.get(&code.to_uppercase())
                    .cloned()
                    .ok_or_else(|| LedgerError::upstream(format!("no quote for {code}")))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct OrderRecord {
    signal_id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    shares: Option<i64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    time: Option<String>,
}

/// Read an order batch with header `signal_id,type,code,shares,price,amount,time`.
///
/// Empty cells default to zero; an empty `time` marks a live order. Line
/// numbers in errors count the header as line 1.
pub fn read_orders(path: &Path) -> Result<Vec<NewOrder>, LedgerError> {
    let content = fs::read_to_string(path)?;
    parse_orders(&content)
}

pub fn parse_orders(content: &str) -> Result<Vec<NewOrder>, LedgerError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut orders = Vec::new();
    for (index, result) in rdr.deserialize::<OrderRecord>().enumerate() {
        let line = index + 2;
        let record = result
            .map_err(|e| LedgerError::validation(format!("order file line {line}: {e}")))?;

        let kind: OrderType = record
            .kind
            .parse()
            .map_err(|e| LedgerError::validation(format!("order file line {line}: {e}")))?;
        let time = match record.time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(
                parse_order_time(value)
                    .map_err(|e| LedgerError::validation(format!("order file line {line}: {e}")))?,
            ),
        };

        orders.push(NewOrder {
            signal_id: record.signal_id,
            kind,
            code: record.code,
            shares: record.shares.unwrap_or(0),
            price: record.price.unwrap_or(0.0),
            amount: record.amount.unwrap_or(0.0),
            time,
        });
    }
    Ok(orders)
}
