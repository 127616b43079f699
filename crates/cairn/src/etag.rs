//! Entity tag computation.

use blake3::Hasher;

use crate::id::B3Id;
use crate::metadata::ResourceMetadata;

/// Compute the ETag of a resource.
///
/// The tag is a BLAKE3 hash over a fixed layout, so identical metadata and
/// chunk lists always produce the same tag:
/// - 8 bytes: property codes (mime, charset, encoding, language)
/// - 8 bytes (u64 LE): size
/// - 8 bytes (u64 LE): version
/// - 8 bytes (i64 LE): last modified
/// - 32 bytes: header address
/// - 8 bytes (u64 LE): chunk count, then 32 bytes per chunk address in order
pub fn compute_etag(metadata: &ResourceMetadata, data_points: &[B3Id]) -> B3Id {
    let mut hasher = Hasher::new();
    hasher.update(&metadata.properties.to_bytes());
    hasher.update(&metadata.size.to_le_bytes());
    hasher.update(&metadata.version.to_le_bytes());
    hasher.update(&metadata.last_modified.to_le_bytes());
    hasher.update(metadata.header.as_slice());

    hasher.update(&(data_points.len() as u64).to_le_bytes());
    for address in data_points {
        hasher.update(address.as_slice());
    }

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ResourceMetadata {
        ResourceMetadata {
            size: 3,
            version: 1,
            last_modified: 1_700_000_000,
            ..ResourceMetadata::default()
        }
    }

    fn chunks() -> Vec<B3Id> {
        vec![B3Id::hash(b"a"), B3Id::hash(b"b"), B3Id::hash(b"c")]
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            compute_etag(&metadata(), &chunks()),
            compute_etag(&metadata(), &chunks())
        );
    }

    #[test]
    fn any_chunk_change_changes_tag() {
        let base = compute_etag(&metadata(), &chunks());

        for i in 0..3 {
            let mut changed = chunks();
            changed[i] = B3Id::hash(b"z");
            assert_ne!(compute_etag(&metadata(), &changed), base);
        }

        let mut reordered = chunks();
        reordered.swap(0, 2);
        assert_ne!(compute_etag(&metadata(), &reordered), base);

        assert_ne!(compute_etag(&metadata(), &chunks()[..2]), base);
    }

    #[test]
    fn any_metadata_change_changes_tag() {
        let base = compute_etag(&metadata(), &chunks());
        let variants = [
            ResourceMetadata { size: 4, ..metadata() },
            ResourceMetadata { version: 2, ..metadata() },
            ResourceMetadata { last_modified: 1, ..metadata() },
            ResourceMetadata { header: B3Id::hash(b"h"), ..metadata() },
            ResourceMetadata {
                properties: crate::metadata::ResourceProperties {
                    language: *b"fr",
                    ..Default::default()
                },
                ..metadata()
            },
        ];
        for variant in variants {
            assert_ne!(compute_etag(&variant, &chunks()), base, "{variant:?}");
        }
    }
}
