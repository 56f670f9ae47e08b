//! Configuration access port trait.

use crate::domain::error::LedgerError;

/// Read access to `[section] key` settings.
pub trait ConfigPort {
    /// Trimmed value, or `None` when the key is absent or blank.
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Whole-number value. A present value that is not a non-negative
    /// integer is a `ConfigInvalid` error rather than a silent default.
    fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>, LedgerError>;

    /// Where the settings were loaded from.
    fn source(&self) -> &str;
}
