//! HTTP quote adapter for CSV quote endpoints.
//!
//! Requests `GET {url}?s=CODE1,CODE2&f=nba` and expects one
//! `name,bid,ask` line per code, in request order. A field of `N/A` marks an
//! unpriceable code.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::domain::error::LedgerError;
use crate::ports::quote_port::{Quote, QuotePort};

pub struct HttpQuoteAdapter {
    client: Client,
    url: String,
}

impl HttpQuoteAdapter {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LedgerError::upstream(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl QuotePort for HttpQuoteAdapter {
    fn quotes(&self, codes: &[String]) -> Result<Vec<Quote>, LedgerError> {
        let symbols = codes.join(",");
        debug!(url = %self.url, symbols = %symbols, "requesting quotes");

        let body = self
            .client
            .get(&self.url)
            .query(&[("s", symbols.as_str()), ("f", "nba")])
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| LedgerError::upstream(format!("quote request failed: {e}")))?;

        parse_quote_lines(codes, &body)
    }
}

/// Pair each response line with the code requested at the same position.
pub fn parse_quote_lines(codes: &[String], body: &str) -> Result<Vec<Quote>, LedgerError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut quotes = Vec::with_capacity(codes.len());
    let mut records = rdr.records();
    for code in codes {
        let record = records
            .next()
            .ok_or_else(|| LedgerError::upstream(format!("no quote line for {code}")))?
            .map_err(|e| LedgerError::upstream(format!("malformed quote response: {e}")))?;

        let field = |idx: usize| -> Result<String, LedgerError> {
            match record.get(idx) {
                Some(value) if !value.is_empty() && value != "N/A" => Ok(value.to_string()),
                _ => Err(LedgerError::upstream(format!("{code} cannot be priced"))),
            }
        };
        let price = |idx: usize| -> Result<f64, LedgerError> {
            field(idx)?
                .parse::<f64>()
                .map_err(|e| LedgerError::upstream(format!("{code} price is not a number: {e}")))
        };

        quotes.push(Quote {
            code: code.clone(),
            name: field(0)?,
            bid: price(1)?,
            ask: price(2)?,
        });
    }
    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn parses_quoted_lines_in_order() {
        let body = "\"BHP Group\",44.50,44.60\n\"Commonwealth Bank\",120.10,120.25\n";
        let quotes = parse_quote_lines(&codes(&["BHP", "CBA"]), body).unwrap();
        assert_eq!(quotes[0].code, "BHP");
        assert_eq!(quotes[0].name, "BHP Group");
        assert_eq!(quotes[1].ask, 120.25);
    }

    #[test]
    fn not_available_fails_the_batch() {
        let body = "\"BHP Group\",44.50,44.60\n\"Unknown\",N/A,N/A\n";
        let result = parse_quote_lines(&codes(&["BHP", "ZZZ"]), body);
        assert!(matches!(result, Err(LedgerError::UpstreamQuote { .. })));
    }

    #[test]
    fn short_response_fails() {
        let body = "\"BHP Group\",44.50,44.60\n";
        assert!(parse_quote_lines(&codes(&["BHP", "CBA"]), body).is_err());
    }

    #[test]
    fn builds_client_with_timeout() {
        assert!(HttpQuoteAdapter::new("http://localhost:1/quotes", 1).is_ok());
    }
}
