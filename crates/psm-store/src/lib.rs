pub mod file_store;
pub mod migrate;
pub mod postgres_store;
pub mod validate;

pub use migrate::{migrate, reestablish_invariants};
pub use postgres_store::PgStore;
pub use validate::validate_store;

use psm_core::PsmError;

/// Where a `Store` is persisted: a plain file path, or a relational DSN
/// recognized by its `postgres(ql)://` prefix.
pub enum Location {
    File(std::path::PathBuf),
    Relational(String),
}

impl Location {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("postgres://") || location.starts_with("postgresql://") {
            Location::Relational(location.to_string())
        } else {
            Location::File(std::path::PathBuf::from(location))
        }
    }
}

/// Loads a store from a file location. Relational locations must go
/// through `PgStore` directly since they need a pool and a store key.
pub fn load_file(path: &std::path::Path) -> Result<psm_core::Store, PsmError> {
    file_store::load(path)
}

pub fn save_file(path: &std::path::Path, store: &psm_core::Store) -> Result<(), PsmError> {
    file_store::save(path, store)
}
