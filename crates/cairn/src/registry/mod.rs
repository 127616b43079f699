//! Content-addressed blob registry holding chunk bytes.
//!
//! The resource store only consumes the narrow interface below; deduplicated
//! storage and royalty accounting belong to the registry implementation.

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::id::B3Id;
use crate::role::Principal;

mod fs;
mod memory;
mod royalty;

pub use fs::FsRegistry;
pub use memory::MemoryRegistry;
pub use royalty::{Payee, RoyaltyLedger};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {0}")]
    NotFound(B3Id),

    #[error("Refusing to store empty content")]
    EmptyContent,

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: B3Id, actual: B3Id },

    #[error("Withdrawal already in progress")]
    Reentrancy,

    #[error("Payment of {amount} to {to} failed: {reason}")]
    PaymentFailed {
        to: Principal,
        amount: u64,
        reason: String,
    },

    #[error("Registry state poisoned")]
    Poisoned,
}

pub trait BlobRegistry {
    /// Size of the stored content, 0 if absent.
    fn size(&self, address: &B3Id) -> Result<u64, RegistryError>;

    /// Read stored content.
    fn read(&self, address: &B3Id) -> Result<Bytes, RegistryError>;

    /// Store content and return its address.
    ///
    /// Idempotent by content. MUST fail with `EmptyContent` for empty data.
    fn write(&self, publisher: &Principal, data: &[u8]) -> Result<B3Id, RegistryError>;

    /// Apply side effects staged by `write` since the last commit or rollback.
    ///
    /// Called once the invocation's database transaction has committed.
    fn commit(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Discard side effects staged by `write`. Stored bytes are kept.
    fn rollback(&self) {}
}
