//! SQLite-backed stores. The game-world store and the control-plane store
//! are independently-transactional databases; the pending-creation side
//! channel is a third, autocommit-only connection in its own database so a
//! checkpoint write can never be swallowed by either business transaction.

use std::fmt;

pub mod pending;
pub mod registry;
pub mod world;

pub use pending::PendingStore;
pub use registry::RegistryStore;
pub use world::WorldStore;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    /// A row that must exist by protocol was missing.
    Missing(String),
    /// A column held a value outside its closed enum set.
    Corrupt(String),
    /// The pending-record connection was found inside a transaction.
    SideChannelInTransaction,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::Missing(what) => write!(f, "missing row: {what}"),
            Self::Corrupt(what) => write!(f, "corrupt column value: {what}"),
            Self::SideChannelInTransaction => {
                write!(f, "pending-record connection is inside a transaction")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Parse a closed-enum TEXT column or surface it as corruption.
pub(crate) fn parse_column<T>(
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
    what: &str,
) -> Result<T, StoreError> {
    parse(value).ok_or_else(|| StoreError::Corrupt(format!("{what}: {value}")))
}
