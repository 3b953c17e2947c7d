//! Core persistence layer for the address book.
//! Generic DAOs over mapped SQLite tables, sharing one session per handle.

pub mod book;
pub mod config;
pub mod dao;
pub mod db;
pub mod logging;
pub mod model;
pub mod schema;

pub use book::{sample_addresses, AddressBook};
pub use config::{ConfigError, DatabaseConfig, DbLocation, LogSettings};
pub use dao::{
    Dao, DaoError, DaoResult, Database, Entity, EntityId, QueryParams, QueryRow, Session, Value,
    Version,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    Address, AddressDetails, CommType, Communication, OrganisationalDetails, PersonalDetails,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
