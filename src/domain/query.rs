//! Sort specifications for the read surfaces.
//!
//! Fields are closed enums mapped to fixed column names, so a caller-supplied
//! field string never reaches SQL text.

use std::str::FromStr;

use super::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// A sortable column of one entity.
pub trait SortField: Copy + FromStr<Err = LedgerError> {
    fn column(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub direction: Direction,
}

impl<F: SortField> Sort<F> {
    pub fn new(field: F, direction: Direction) -> Self {
        Sort { field, direction }
    }

    /// `ORDER BY` clause body, with `id` as a stable tie-breaker.
    pub fn order_by(&self) -> String {
        let dir = self.direction.sql();
        match self.field.column() {
            "id" => format!("id {dir}"),
            column => format!("{column} {dir}, id {dir}"),
        }
    }

    /// Parse an optional field name; `None` keeps `default`.
    pub fn parse(field: Option<&str>, ascending: bool, default: F) -> Result<Self, LedgerError> {
        let field = match field {
            Some(name) => name.parse()?,
            None => default,
        };
        let direction = if ascending {
            Direction::Ascending
        } else {
            Direction::Descending
        };
        Ok(Sort { field, direction })
    }
}

macro_rules! sort_fields {
    ($name:ident, $entity:literal, { $($variant:ident => ($key:literal, $column:literal)),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl SortField for $name {
            fn column(self) -> &'static str {
                match self {
                    $($name::$variant => $column),+
                }
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($key => Ok($name::$variant),)+
                    other => Err(LedgerError::validation(format!(
                        "cannot sort {} by {other}",
                        $entity
                    ))),
                }
            }
        }
    };
}

sort_fields!(SignalField, "signals", {
    Id => ("id", "id"),
    Name => ("name", "name"),
    Price => ("price", "price"),
    NumSubscribers => ("num_subscribers", "num_subscribers"),
    NumTrades => ("num_trades", "num_trades"),
    Growth => ("growth", "growth"),
    FirstTradeTime => ("first_trade_time", "first_trade_time"),
    LastTradeTime => ("last_trade_time", "last_trade_time"),
});

sort_fields!(HoldingField, "holdings", {
    Code => ("code", "code"),
    Name => ("name", "name"),
    Shares => ("shares", "shares"),
    Price => ("price", "price"),
});

sort_fields!(OrderField, "orders", {
    Time => ("time", "order_time"),
    Type => ("type", "type"),
    Code => ("code", "code"),
    Shares => ("shares", "shares"),
    Price => ("price", "price"),
    Profit => ("profit", "profit"),
});

impl Default for Sort<SignalField> {
    fn default() -> Self {
        Sort::new(SignalField::Id, Direction::Descending)
    }
}

impl Default for Sort<HoldingField> {
    fn default() -> Self {
        Sort::new(HoldingField::Code, Direction::Ascending)
    }
}

impl Default for Sort<OrderField> {
    fn default() -> Self {
        Sort::new(OrderField::Time, Direction::Descending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_fields() {
        assert_eq!("Price".parse::<HoldingField>().unwrap(), HoldingField::Price);
        assert_eq!("num_trades".parse::<SignalField>().unwrap(), SignalField::NumTrades);
        assert_eq!("time".parse::<OrderField>().unwrap(), OrderField::Time);
        assert_eq!(OrderField::Time.column(), "order_time");
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = "price; DROP TABLE holdings".parse::<HoldingField>().unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[test]
    fn order_by_adds_id_tie_breaker() {
        let sort = Sort::new(HoldingField::Shares, Direction::Descending);
        assert_eq!(sort.order_by(), "shares DESC, id DESC");
        assert_eq!(Sort::<SignalField>::default().order_by(), "id DESC");
    }

    #[test]
    fn parse_falls_back_to_default_field() {
        let sort = Sort::parse(None, true, OrderField::Time).unwrap();
        assert_eq!(sort.field, OrderField::Time);
        assert_eq!(sort.direction, Direction::Ascending);
        assert!(Sort::parse(Some("colour"), false, OrderField::Time).is_err());
    }
}
