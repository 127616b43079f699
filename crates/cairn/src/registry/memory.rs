use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tracing::debug;

use super::{BlobRegistry, RegistryError, RoyaltyLedger};
use crate::id::B3Id;
use crate::role::Principal;

struct Entry {
    data: Bytes,
    publisher: Principal,
}

/// A royalty owed by `payer` to `publisher`, applied on commit.
struct PendingRoyalty {
    payer: Principal,
    publisher: Principal,
    amount: u64,
}

/// In-process registry that remembers the first publisher of each blob.
///
/// Writing content that already exists charges the writer `royalty_rate` per
/// byte and credits the original publisher, unless the writer is that
/// publisher. Royalties are staged until [`BlobRegistry::commit`]; a rollback
/// drops them. Stored bytes are never rolled back.
#[derive(Default)]
pub struct MemoryRegistry {
    blobs: Mutex<HashMap<B3Id, Entry>>,
    pending: Mutex<Vec<PendingRoyalty>>,
    royalties: RoyaltyLedger,
    royalty_rate: u64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_royalty_rate(royalty_rate: u64) -> Self {
        Self {
            royalty_rate,
            ..Self::default()
        }
    }

    pub fn royalties(&self) -> &RoyaltyLedger {
        &self.royalties
    }

    pub fn publisher(&self, address: &B3Id) -> Result<Option<Principal>, RegistryError> {
        let blobs = self.blobs.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(blobs.get(address).map(|entry| entry.publisher.clone()))
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.blobs.lock().map_err(|_| RegistryError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}

impl BlobRegistry for MemoryRegistry {
    fn size(&self, address: &B3Id) -> Result<u64, RegistryError> {
        let blobs = self.blobs.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(blobs
            .get(address)
            .map(|entry| entry.data.len() as u64)
            .unwrap_or(0))
    }

    fn read(&self, address: &B3Id) -> Result<Bytes, RegistryError> {
        let blobs = self.blobs.lock().map_err(|_| RegistryError::Poisoned)?;
        blobs
            .get(address)
            .map(|entry| entry.data.clone())
            .ok_or(RegistryError::NotFound(*address))
    }

    fn write(&self, publisher: &Principal, data: &[u8]) -> Result<B3Id, RegistryError> {
        if data.is_empty() {
            return Err(RegistryError::EmptyContent);
        }

        let address = B3Id::hash(data);
        let original = {
            let mut blobs = self.blobs.lock().map_err(|_| RegistryError::Poisoned)?;
            match blobs.get(&address) {
                Some(entry) => Some(entry.publisher.clone()),
                None => {
                    blobs.insert(
                        address,
                        Entry {
                            data: Bytes::copy_from_slice(data),
                            publisher: publisher.clone(),
                        },
                    );
                    None
                }
            }
        };

        match original {
            Some(original) if original != *publisher && self.royalty_rate > 0 => {
                let royalty = self.royalty_rate.saturating_mul(data.len() as u64);
                self.pending
                    .lock()
                    .map_err(|_| RegistryError::Poisoned)?
                    .push(PendingRoyalty {
                        payer: publisher.clone(),
                        publisher: original.clone(),
                        amount: royalty,
                    });
                debug!(%address, %original, royalty, "Republished existing blob");
            }
            Some(_) => debug!(%address, "Blob already stored"),
            None => debug!(%address, size = data.len(), "Stored blob"),
        }

        Ok(address)
    }

    fn commit(&self) -> Result<(), RegistryError> {
        let pending = {
            let mut pending = self.pending.lock().map_err(|_| RegistryError::Poisoned)?;
            std::mem::take(&mut *pending)
        };
        for royalty in pending {
            self.royalties
                .charge(&royalty.payer, &royalty.publisher, royalty.amount)?;
        }
        Ok(())
    }

    fn rollback(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}
