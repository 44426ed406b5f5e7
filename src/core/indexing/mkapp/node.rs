//! Tree nodes and their on-page byte layout.

use std::io::Read;

use crate::core::common::{MkAppError, MkAppResult, PageId};

use super::approximation::KnnDistanceApproximation;
use super::entry::{DirectoryEntry, LeafEntry};

/// A node of the MkApp-Tree, fetched from and stored to the page file as one
/// page.
///
/// The serialized layout is what the capacity planner's size formulas
/// describe: a fixed per-node overhead (tag byte, page id, entry count)
/// followed by fixed-size entries. Big-endian throughout.
#[derive(Debug, Clone, PartialEq)]
pub enum MkAppNode {
    /// Inner node holding routing entries.
    Directory { page_id: PageId, entries: Vec<DirectoryEntry> },
    /// Leaf node holding one entry per object.
    Leaf { page_id: PageId, entries: Vec<LeafEntry> },
}

impl MkAppNode {
    /// Creates an empty directory node on the given page.
    #[must_use]
    pub const fn new_directory(page_id: PageId) -> Self {
        Self::Directory { page_id, entries: Vec::new() }
    }

    /// Creates an empty leaf node on the given page.
    #[must_use]
    pub const fn new_leaf(page_id: PageId) -> Self {
        Self::Leaf { page_id, entries: Vec::new() }
    }

    /// The page this node lives on.
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        match self {
            Self::Directory { page_id, .. } | Self::Leaf { page_id, .. } => *page_id,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        match self {
            Self::Directory { entries, .. } => entries.len(),
            Self::Leaf { entries, .. } => entries.len(),
        }
    }

    // --- Serialization / Deserialization ---

    pub fn to_bytes(&self) -> MkAppResult<Vec<u8>> {
        let mut bytes = Vec::new();
        match self {
            Self::Directory { page_id, entries } => {
                bytes.push(0_u8); // 0 for directory node
                bytes.extend_from_slice(&page_id.to_be_bytes());
                let count = u32::try_from(entries.len())
                    .map_err(|_| MkAppError::Serialization("entry count exceeds u32".into()))?;
                bytes.extend_from_slice(&count.to_be_bytes());
                for entry in entries {
                    bytes.extend_from_slice(&entry.routing_id.to_be_bytes());
                    bytes.extend_from_slice(&entry.child_page.to_be_bytes());
                    bytes.extend_from_slice(&entry.covering_radius.to_be_bytes());
                    bytes.extend_from_slice(&entry.parent_distance.to_be_bytes());
                    write_coefficients(&mut bytes, entry.approximation.as_ref())?;
                }
            }
            Self::Leaf { page_id, entries } => {
                bytes.push(1_u8); // 1 for leaf node
                bytes.extend_from_slice(&page_id.to_be_bytes());
                let count = u32::try_from(entries.len())
                    .map_err(|_| MkAppError::Serialization("entry count exceeds u32".into()))?;
                bytes.extend_from_slice(&count.to_be_bytes());
                for entry in entries {
                    bytes.extend_from_slice(&entry.object_id.to_be_bytes());
                    bytes.extend_from_slice(&entry.parent_distance.to_be_bytes());
                    write_coefficients(&mut bytes, entry.approximation.as_ref())?;
                }
            }
        }
        Ok(bytes)
    }

    /// Parses a node from a page buffer; trailing page padding is ignored.
    pub fn from_bytes(bytes: &[u8]) -> MkAppResult<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let tag = read_u8(&mut cursor)?;
        let page_id = read_u64(&mut cursor)?;
        let num_entries = read_u32(&mut cursor)? as usize;

        match tag {
            0 => {
                let mut entries = Vec::with_capacity(num_entries);
                for _ in 0..num_entries {
                    let routing_id = read_u64(&mut cursor)?;
                    let child_page = read_u64(&mut cursor)?;
                    let covering_radius = read_f64(&mut cursor)?;
                    let parent_distance = read_f64(&mut cursor)?;
                    let approximation = read_coefficients(&mut cursor)?;
                    entries.push(DirectoryEntry {
                        routing_id,
                        parent_distance,
                        child_page,
                        covering_radius,
                        approximation,
                    });
                }
                Ok(Self::Directory { page_id, entries })
            }
            1 => {
                let mut entries = Vec::with_capacity(num_entries);
                for _ in 0..num_entries {
                    let object_id = read_u64(&mut cursor)?;
                    let parent_distance = read_f64(&mut cursor)?;
                    let approximation = read_coefficients(&mut cursor)?;
                    entries.push(LeafEntry { object_id, parent_distance, approximation });
                }
                Ok(Self::Leaf { page_id, entries })
            }
            other => Err(MkAppError::Serialization(format!("unknown node tag: {other}"))),
        }
    }
}

fn write_coefficients(
    bytes: &mut Vec<u8>,
    approximation: Option<&KnnDistanceApproximation>,
) -> MkAppResult<()> {
    // Coefficient count 0 encodes an entry whose model has not been fitted.
    let coefficients = approximation.map_or(&[] as &[f64], KnnDistanceApproximation::coefficients);
    let count = u16::try_from(coefficients.len())
        .map_err(|_| MkAppError::Serialization("coefficient count exceeds u16".into()))?;
    bytes.extend_from_slice(&count.to_be_bytes());
    for &coefficient in coefficients {
        bytes.extend_from_slice(&coefficient.to_be_bytes());
    }
    Ok(())
}

fn read_coefficients(
    cursor: &mut std::io::Cursor<&[u8]>,
) -> MkAppResult<Option<KnnDistanceApproximation>> {
    let count = read_u16(cursor)? as usize;
    if count == 0 {
        return Ok(None);
    }
    let mut coefficients = Vec::with_capacity(count);
    for _ in 0..count {
        coefficients.push(read_f64(cursor)?);
    }
    Ok(Some(KnnDistanceApproximation::new(coefficients)))
}

// --- Serialization helper functions ---

fn read_u8(cursor: &mut std::io::Cursor<&[u8]>) -> MkAppResult<u8> {
    let mut buf = [0_u8; 1];
    cursor.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(cursor: &mut std::io::Cursor<&[u8]>) -> MkAppResult<u16> {
    let mut buf = [0_u8; 2];
    cursor.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(cursor: &mut std::io::Cursor<&[u8]>) -> MkAppResult<u32> {
    let mut buf = [0_u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64(cursor: &mut std::io::Cursor<&[u8]>) -> MkAppResult<u64> {
    let mut buf = [0_u8; 8];
    cursor.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn read_f64(cursor: &mut std::io::Cursor<&[u8]>) -> MkAppResult<f64> {
    let mut buf = [0_u8; 8];
    cursor.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}
