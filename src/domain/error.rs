//! Domain error types.

/// Broad classification of a [`LedgerError`], used by callers that need to
/// tell money, holdings, input, pricing and storage failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    InsufficientHoldings,
    NotFound,
    UpstreamQuote,
    Persistence,
    Config,
    Io,
}

/// Top-level error type for sigledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    #[error("insufficient funds on signal {signal_id}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        signal_id: i64,
        required: f64,
        available: f64,
    },

    #[error("insufficient holdings on signal {signal_id}: {requested} {code} requested, {held} held")]
    InsufficientHoldings {
        signal_id: i64,
        code: String,
        requested: i64,
        held: i64,
    },

    #[error("{entity} {key} does not exist")]
    NotFound { entity: &'static str, key: String },

    #[error("quote lookup failed: {reason}")]
    UpstreamQuote { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn validation(reason: impl Into<String>) -> Self {
        LedgerError::Validation {
            reason: reason.into(),
        }
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        LedgerError::UpstreamQuote {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InsufficientHoldings { .. } => ErrorKind::InsufficientHoldings,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::UpstreamQuote { .. } => ErrorKind::UpstreamQuote,
            LedgerError::Database { .. } | LedgerError::DatabaseQuery { .. } => {
                ErrorKind::Persistence
            }
            LedgerError::ConfigParse { .. }
            | LedgerError::ConfigMissing { .. }
            | LedgerError::ConfigInvalid { .. } => ErrorKind::Config,
            LedgerError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_persistence(&self) -> bool {
        self.kind() == ErrorKind::Persistence
    }
}

impl From<&LedgerError> for std::process::ExitCode {
    fn from(err: &LedgerError) -> Self {
        let code: u8 = match err.kind() {
            ErrorKind::Io => 1,
            ErrorKind::Config => 2,
            ErrorKind::Persistence => 3,
            ErrorKind::Validation | ErrorKind::NotFound => 4,
            ErrorKind::InsufficientFunds | ErrorKind::InsufficientHoldings => 5,
            ErrorKind::UpstreamQuote => 6,
        };
        std::process::ExitCode::from(code)
    }
}
