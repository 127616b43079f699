use std::path::PathBuf;

use crate::role::Principal;

#[derive(Debug, Clone)]
pub struct Config {
    /// Site directory holding the database and the chunk tree.
    pub storage_path: PathBuf,
    /// Made DEFAULT_ADMIN when the site is first created.
    pub owner: Principal,
}

impl Config {
    pub fn new(storage_path: impl Into<PathBuf>, owner: Principal) -> Self {
        Self {
            storage_path: storage_path.into(),
            owner,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_path.join("site.db")
    }
}
