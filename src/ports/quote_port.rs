//! Market quote port trait.

use std::collections::HashMap;

use crate::domain::error::LedgerError;

/// Current market data for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub code: String,
    pub name: String,
    pub bid: f64,
    pub ask: f64,
}

pub trait QuotePort {
    /// One quote per requested code, in request order.
    ///
    /// Implementations fail the whole batch when any code cannot be priced.
    fn quotes(&self, codes: &[String]) -> Result<Vec<Quote>, LedgerError>;
}

/// Fetch a batch and check it lines up with the request.
///
/// A short batch, a reordered batch or a non-positive price is treated as an
/// unpriceable code and fails everything.
pub fn fetch_quotes(port: &dyn QuotePort, codes: &[String]) -> Result<Vec<Quote>, LedgerError> {
    if codes.is_empty() {
        return Err(LedgerError::validation("quote request needs at least one code"));
    }

    let quotes = port.quotes(codes)?;
    if quotes.len() != codes.len() {
        return Err(LedgerError::upstream(format!(
            "requested {} quotes, received {}",
            codes.len(),
            quotes.len()
        )));
    }

    for (code, quote) in codes.iter().zip(&quotes) {
        if !quote.code.eq_ignore_ascii_case(code) {
            return Err(LedgerError::upstream(format!(
                "expected quote for {code}, received {}",
                quote.code
            )));
        }
        if !is_price(quote.bid) || !is_price(quote.ask) {
            return Err(LedgerError::upstream(format!("{code} cannot be priced")));
        }
    }

    Ok(quotes)
}

/// Current bid per code.
pub fn bid_prices(
    port: &dyn QuotePort,
    codes: &[String],
) -> Result<HashMap<String, f64>, LedgerError> {
    Ok(fetch_quotes(port, codes)?
        .into_iter()
        .zip(codes)
        .map(|(quote, code)| (code.clone(), quote.bid))
        .collect())
}

fn is_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
