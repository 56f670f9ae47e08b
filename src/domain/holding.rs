//! Holdings: one current position per (signal, code) at weighted-average cost.

use super::error::LedgerError;

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub signal_id: i64,
    pub code: String,
    pub name: String,
    /// Always > 0 while the holding exists.
    pub shares: i64,
    /// Weighted-average cost price.
    pub price: f64,
}

impl Holding {
    pub fn open(signal_id: i64, code: &str, name: &str, shares: i64, price: f64) -> Self {
        Holding {
            signal_id,
            code: code.to_string(),
            name: name.to_string(),
            shares,
            price,
        }
    }

    pub fn cost_value(&self) -> f64 {
        self.shares as f64 * self.price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    /// Add `shares` bought at `price`, reweighting the average cost.
    ///
    /// Fails without changing the holding when the share count would
    /// overflow.
    pub fn absorb(&mut self, shares: i64, price: f64) -> Result<(), LedgerError> {
        let total = self.shares.checked_add(shares).ok_or_else(|| {
            LedgerError::validation(format!(
                "adding {shares} shares to {} held in {} overflows",
                self.shares, self.code
            ))
        })?;
        self.price = (self.price * self.shares as f64 + price * shares as f64) / total as f64;
        self.shares = total;
        Ok(())
    }

    /// Remove `shares` sold at `price` and return the realized profit.
    ///
    /// The caller checks `shares <= self.shares` beforehand.
    pub fn release(&mut self, shares: i64, price: f64) -> f64 {
        let profit = shares as f64 * (price - self.price);
        self.shares -= shares;
        profit
    }

    pub fn is_closed(&self) -> bool {
        self.shares <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_holding() -> Holding {
        Holding::open(1, "BHP", "BHP Group", 10, 50.0)
    }

    #[test]
    fn cost_and_market_value() {
        let h = sample_holding();
        assert!((h.cost_value() - 500.0).abs() < f64::EPSILON);
        assert!((h.market_value(80.0) - 800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn absorb_reweights_average_cost() {
        let mut h = sample_holding();
        h.absorb(30, 70.0).unwrap();
        assert_eq!(h.shares, 40);
        // (10*50 + 30*70) / 40
        assert!((h.price - 65.0).abs() < 1e-9);
    }

    #[test]
    fn absorb_at_same_price_keeps_cost() {
        let mut h = sample_holding();
        h.absorb(5, 50.0).unwrap();
        assert_eq!(h.shares, 15);
        assert!((h.price - 50.0).abs() < 1e-9);
    }

    #[test]
    fn absorb_overflow_is_rejected_untouched() {
        let mut h = sample_holding();
        let result = h.absorb(i64::MAX, 50.0);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
        assert_eq!(h, sample_holding());
    }

    #[test]
    fn release_returns_profit_against_average_cost() {
        let mut h = sample_holding();
        let profit = h.release(4, 80.0);
        assert!((profit - 120.0).abs() < f64::EPSILON);
        assert_eq!(h.shares, 6);
        assert!((h.price - 50.0).abs() < f64::EPSILON);
        assert!(!h.is_closed());
    }

    #[test]
    fn release_everything_closes() {
        let mut h = sample_holding();
        let profit = h.release(10, 40.0);
        assert!((profit - (-100.0)).abs() < f64::EPSILON);
        assert!(h.is_closed());
    }
}
