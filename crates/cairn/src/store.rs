//! Resource store: headers, metadata and ordered chunk references.
//!
//! Chunk bytes live in the [`BlobRegistry`]; the store only keeps the
//! content address and size of each chunk, keyed by `(path, chunk_index)`.
//! Indices are dense: a chunk may replace an existing slot or append at the
//! current end, never leave a gap.

use std::ops::RangeInclusive;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::db::{get_setting, put_setting};
use crate::error::Error;
use crate::events::Event;
use crate::header::HeaderInfo;
use crate::id::B3Id;
use crate::messages::DataRegistration;
use crate::metadata::{ChunkRef, ResourceMetadata, ResourceProperties, ResourceState};
use crate::registry::{BlobRegistry, RegistryError};
use crate::role::Principal;

const DEFAULT_HEADER_KEY: &str = "default_header";

/// Changes applied by [`ResourceStore::update_metadata`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataUpdate {
    pub properties: Option<ResourceProperties>,
    pub header: Option<B3Id>,
}

pub struct ResourceStore<'a, R: BlobRegistry + ?Sized> {
    conn: &'a Connection,
    registry: &'a R,
    /// Unix seconds used for every `last_modified` written by this store.
    now: i64,
}

impl<'a, R: BlobRegistry + ?Sized> ResourceStore<'a, R> {
    pub fn new(conn: &'a Connection, registry: &'a R, now: i64) -> Self {
        Self {
            conn,
            registry,
            now,
        }
    }

    pub fn registry(&self) -> &'a R {
        self.registry
    }

    // Headers

    /// Store a header, returning its address. Identical headers share one row.
    pub fn create_header(&self, header: &HeaderInfo) -> Result<B3Id, Error> {
        let encoded = header.encode()?;
        let address = B3Id::hash(&encoded);

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO headers (address, encoded) VALUES (?1, ?2)",
            params![address, encoded.as_ref()],
        )?;
        if inserted == 0 {
            debug!(%address, "Header already stored");
        } else {
            debug!(%address, "Stored header");
        }
        Ok(address)
    }

    pub fn header(&self, address: &B3Id) -> Result<Option<HeaderInfo>, Error> {
        let encoded: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT encoded FROM headers WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(encoded.map(|data| HeaderInfo::decode(&data)).transpose()?)
    }

    pub fn default_header_address(&self) -> Result<B3Id, Error> {
        match get_setting(self.conn, DEFAULT_HEADER_KEY)? {
            Some(value) => B3Id::try_from(value)
                .map_err(|_| Error::BadRequest("corrupt default header setting".into())),
            None => Ok(B3Id::ZERO),
        }
    }

    /// Replace the fallback header. Resource rows are not touched.
    pub fn set_default_header(
        &self,
        header: &HeaderInfo,
        journal: &mut Vec<Event>,
    ) -> Result<B3Id, Error> {
        let address = self.create_header(header)?;
        put_setting(self.conn, DEFAULT_HEADER_KEY, address.as_slice())?;
        journal.push(Event::DefaultHeaderChanged { address });
        Ok(address)
    }

    /// Header referenced by `address`, with zero meaning the site default.
    pub fn resolve_header(&self, address: &B3Id) -> Result<HeaderInfo, Error> {
        let address = if address.is_zero() {
            self.default_header_address()?
        } else {
            *address
        };
        if address.is_zero() {
            return Ok(HeaderInfo::default());
        }
        Ok(self.header(&address)?.unwrap_or_default())
    }

    pub fn read_header(&self, path: &str) -> Result<HeaderInfo, Error> {
        let metadata = self.read_metadata(path)?;
        self.resolve_header(&metadata.header)
    }

    // Metadata

    fn load(&self, path: &str) -> Result<Option<(ResourceMetadata, bool)>, Error> {
        Ok(self
            .conn
            .query_row(
                "SELECT properties, size, version, last_modified, header, deleted
                 FROM resources WHERE path = ?1",
                params![path],
                |row| {
                    let properties: [u8; 8] = row.get(0)?;
                    let metadata = ResourceMetadata {
                        properties: ResourceProperties::from_bytes(properties),
                        size: row.get::<_, i64>(1)? as u64,
                        version: row.get::<_, i64>(2)? as u64,
                        last_modified: row.get(3)?,
                        header: row.get(4)?,
                    };
                    Ok((metadata, row.get(5)?))
                },
            )
            .optional()?)
    }

    /// Stored metadata, or the zero value for a path never written.
    pub fn read_metadata(&self, path: &str) -> Result<ResourceMetadata, Error> {
        Ok(self.load(path)?.map(|(metadata, _)| metadata).unwrap_or_default())
    }

    pub fn resource_state(&self, path: &str) -> Result<ResourceState, Error> {
        Ok(match self.load(path)? {
            None => ResourceState::Absent,
            Some((_, true)) => ResourceState::Gone,
            Some((_, false)) => ResourceState::Present,
        })
    }

    /// Create the metadata row if missing. `revive` clears a tombstone.
    fn ensure_metadata(&self, path: &str, revive: bool) -> Result<(), Error> {
        self.conn.execute(
            "INSERT OR IGNORE INTO resources (path, properties, header) VALUES (?1, ?2, ?3)",
            params![path, [0u8; 8], B3Id::ZERO],
        )?;
        if revive {
            self.conn.execute(
                "UPDATE resources SET deleted = 0 WHERE path = ?1",
                params![path],
            )?;
        }
        Ok(())
    }

    /// Apply `update`, bump the version and refresh size and timestamp.
    pub fn update_metadata(
        &self,
        path: &str,
        update: MetadataUpdate,
        journal: &mut Vec<Event>,
    ) -> Result<ResourceMetadata, Error> {
        self.ensure_metadata(path, false)?;
        if let Some(properties) = update.properties {
            self.conn.execute(
                "UPDATE resources SET properties = ?2 WHERE path = ?1",
                params![path, properties.to_bytes()],
            )?;
        }
        if let Some(header) = update.header {
            self.conn.execute(
                "UPDATE resources SET header = ?2 WHERE path = ?1",
                params![path, header],
            )?;
        }
        self.conn.execute(
            "UPDATE resources SET version = version + 1 WHERE path = ?1",
            params![path],
        )?;

        let metadata = self.update_metadata_stats(path)?;
        journal.push(Event::MetadataUpdated {
            path: path.to_string(),
        });
        Ok(metadata)
    }

    /// Recompute size from the stored chunks and stamp `last_modified`.
    pub fn update_metadata_stats(&self, path: &str) -> Result<ResourceMetadata, Error> {
        self.conn.execute(
            "UPDATE resources SET
                size = (SELECT COALESCE(SUM(size), 0) FROM chunks WHERE path = ?1),
                last_modified = ?2
             WHERE path = ?1",
            params![path, self.now],
        )?;
        self.read_metadata(path)
    }

    // Chunks

    pub fn chunk_count(&self, path: &str) -> Result<u64, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn chunks(&self, path: &str) -> Result<Vec<ChunkRef>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT address, size FROM chunks WHERE path = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![path], |row| {
            Ok(ChunkRef {
                address: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Ordered chunk addresses.
    pub fn data_points(&self, path: &str) -> Result<Vec<B3Id>, Error> {
        Ok(self
            .chunks(path)?
            .into_iter()
            .map(|chunk| chunk.address)
            .collect())
    }

    /// The header forbids mutation and the resource has content.
    pub fn is_immutable(&self, path: &str) -> Result<bool, Error> {
        Ok(self.read_header(path)?.is_immutable() && self.chunk_count(path)? > 0)
    }

    pub fn not_immutable(&self, path: &str) -> Result<(), Error> {
        if self.is_immutable(path)? {
            return Err(Error::Conflict {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Store chunk bytes in the registry on behalf of `publisher`.
    pub fn publish(&self, publisher: &Principal, data: &[u8]) -> Result<ChunkRef, Error> {
        let address = self.registry.write(publisher, data)?;
        Ok(ChunkRef {
            address,
            size: data.len() as u64,
        })
    }

    fn write_chunk(
        &self,
        path: &str,
        chunk_index: u64,
        chunk: ChunkRef,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        let was_empty = self.chunk_count(path)? == 0;
        self.conn.execute(
            "INSERT OR REPLACE INTO chunks (path, chunk_index, address, size)
             VALUES (?1, ?2, ?3, ?4)",
            params![path, chunk_index as i64, chunk.address, chunk.size as i64],
        )?;
        debug!(path, chunk_index, address = %chunk.address, "Wrote chunk");

        journal.push(if was_empty {
            Event::ResourceCreated {
                path: path.to_string(),
            }
        } else {
            Event::ResourceUpdated {
                path: path.to_string(),
                chunk_index,
            }
        });
        Ok(())
    }

    fn out_of_bounds(&self, path: &str, chunk_index: u64, length: u64) -> Error {
        warn!(path, chunk_index, length, "Chunk index out of bounds");
        Error::OutOfBoundsChunk {
            path: path.to_string(),
            chunk_index,
            length,
        }
    }

    pub fn create_resource(
        &self,
        path: &str,
        registration: &DataRegistration,
        publisher: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        self.upload_resource(path, std::slice::from_ref(registration), publisher, journal)
    }

    /// Write chunks in order, each replacing a slot or appending at the end.
    ///
    /// Every registration is checked before any byte reaches the registry.
    pub fn upload_resource(
        &self,
        path: &str,
        registrations: &[DataRegistration],
        publisher: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        let mut length = self.chunk_count(path)?;
        for registration in registrations {
            if registration.data.is_empty() {
                return Err(Error::BadRequest(format!(
                    "empty chunk at index {}",
                    registration.chunk_index
                )));
            }
            if registration.chunk_index > length {
                return Err(self.out_of_bounds(path, registration.chunk_index, length));
            }
            if registration.chunk_index == length {
                length += 1;
            }
        }

        self.ensure_metadata(path, true)?;
        for registration in registrations {
            let chunk = self.publish(publisher, &registration.data)?;
            self.write_chunk(path, registration.chunk_index, chunk, journal)?;
        }
        self.update_metadata_stats(path)?;
        Ok(())
    }

    /// Point an existing slot at an already-stored chunk.
    pub fn update_resource(
        &self,
        path: &str,
        address: B3Id,
        chunk_index: u64,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        let length = self.chunk_count(path)?;
        if chunk_index >= length {
            return Err(self.out_of_bounds(path, chunk_index, length));
        }

        let size = self.registry.size(&address)?;
        if size == 0 {
            return Err(RegistryError::NotFound(address).into());
        }

        self.write_chunk(path, chunk_index, ChunkRef { address, size }, journal)?;
        self.update_metadata_stats(path)?;
        Ok(())
    }

    /// Overwrite existing slots only. All indices are checked first.
    pub fn patch_resource(
        &self,
        path: &str,
        registrations: &[DataRegistration],
        publisher: &Principal,
        journal: &mut Vec<Event>,
    ) -> Result<(), Error> {
        let length = self.chunk_count(path)?;
        for registration in registrations {
            if registration.data.is_empty() {
                return Err(Error::BadRequest(format!(
                    "empty chunk at index {}",
                    registration.chunk_index
                )));
            }
            if registration.chunk_index >= length {
                return Err(self.out_of_bounds(path, registration.chunk_index, length));
            }
        }

        for registration in registrations {
            let chunk = self.publish(publisher, &registration.data)?;
            self.update_resource(path, chunk.address, registration.chunk_index, journal)?;
        }
        Ok(())
    }

    /// Drop every chunk at or after `length`.
    pub fn truncate(&self, path: &str, length: u64) -> Result<(), Error> {
        let removed = self.conn.execute(
            "DELETE FROM chunks WHERE path = ?1 AND chunk_index >= ?2",
            params![path, length as i64],
        )?;
        if removed > 0 {
            debug!(path, length, removed, "Truncated resource");
        }
        Ok(())
    }

    /// Clear the chunk array.
    pub fn delete_resource(&self, path: &str, journal: &mut Vec<Event>) -> Result<(), Error> {
        self.truncate(path, 0)?;
        journal.push(Event::ResourceDeleted {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Tombstone the metadata row, keeping its header and version.
    pub fn delete_metadata(&self, path: &str, journal: &mut Vec<Event>) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE resources SET properties = ?2, size = 0, last_modified = ?3, deleted = 1
             WHERE path = ?1",
            params![path, [0u8; 8], self.now],
        )?;
        journal.push(Event::MetadataDeleted {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Bytes of `path` covered by `span`, fetched from the registry.
    pub fn read_bytes(&self, path: &str, span: RangeInclusive<u64>) -> Result<Vec<u8>, Error> {
        let (start, end) = span.into_inner();
        let mut out = Vec::with_capacity(end.saturating_sub(start).saturating_add(1) as usize);

        let mut offset = 0u64;
        for chunk in self.chunks(path)? {
            if offset > end {
                break;
            }
            let chunk_end = offset + chunk.size;
            if chunk_end > start {
                let data = self.registry.read(&chunk.address)?;
                let to = ((end + 1 - offset) as usize).min(data.len());
                let from = (start.saturating_sub(offset) as usize).min(to);
                out.extend_from_slice(&data[from..to]);
            }
            offset = chunk_end;
        }

        Ok(out)
    }
}
