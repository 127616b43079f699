use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::{BlobRegistry, RegistryError};
use crate::id::B3Id;
use crate::role::Principal;

/// Registry storing each blob as a file in a sharded directory tree.
///
/// Publishers are not recorded, so no royalties accrue.
pub struct FsRegistry {
    base_path: PathBuf,
}

impl FsRegistry {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Initialize directory structure
    pub fn init(&self) -> Result<(), RegistryError> {
        fs::create_dir_all(self.base_path.join("chunks"))?;
        Ok(())
    }

    /// Convert a 32-byte ID to a sharded path.
    /// Example: ab/cd/ef0123456789... (first 2 bytes as subdirs)
    fn sharded_path(&self, id: &B3Id) -> PathBuf {
        let hex = id.as_hex();
        self.base_path
            .join("chunks")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex[4..])
    }

    /// Atomic write: write to tempfile, then rename
    fn atomic_write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(parent)?;

        let temp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(temp.path(), data)?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl BlobRegistry for FsRegistry {
    fn size(&self, address: &B3Id) -> Result<u64, RegistryError> {
        match fs::metadata(self.sharded_path(address)) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(RegistryError::Io(e)),
        }
    }

    fn read(&self, address: &B3Id) -> Result<Bytes, RegistryError> {
        let data = fs::read(self.sharded_path(address)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RegistryError::NotFound(*address)
            } else {
                RegistryError::Io(e)
            }
        })?;

        // Verify hash
        let actual = B3Id::hash(&data);
        if actual != *address {
            return Err(RegistryError::HashMismatch {
                expected: *address,
                actual,
            });
        }

        Ok(Bytes::from(data))
    }

    fn write(&self, publisher: &Principal, data: &[u8]) -> Result<B3Id, RegistryError> {
        if data.is_empty() {
            return Err(RegistryError::EmptyContent);
        }

        let address = B3Id::hash(data);
        let path = self.sharded_path(&address);

        // Check if already exists
        if fs::exists(&path)? {
            debug!(%address, %publisher, "Blob already stored");
            return Ok(address);
        }

        self.atomic_write(&path, data)?;
        debug!(%address, %publisher, size = data.len(), "Stored blob");
        Ok(address)
    }
}
