use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrellisError {
    #[error("resource '{0}' is missing a prefix")]
    MissingPrefix(String),
    #[error("cannot store a value of this shape: {0}")]
    UnsupportedValue(String),
    #[error("invalid value kind")]
    InvalidValueKind,
    #[error("not a document value")]
    NotADocument,
    #[error("at least one filter is required")]
    AtLeastOneFilterRequired,
    #[error("cannot filter on value kind '{0}'")]
    CannotFilterOnKind(String),
    #[error("no matching data")]
    NoMatchingData,
    #[error("index '{0}' already exists on database")]
    IndexAlreadyExists(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, TrellisError>;

// Helper conversions
impl From<rusqlite::Error> for TrellisError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TrellisError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<config::ConfigError> for TrellisError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for TrellisError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
