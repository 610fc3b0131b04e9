//! Metadata records

use super::{EntryId, MAX_NAME_UNITS, RECORD_SIZE};
use crate::error::{ContainerError, Result};
use crate::header::le_u32;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const NAME_OFFSET: usize = 46;

/// Entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One metadata record
///
/// Files point at a single stored payload (`start_offset`,
/// `compressed_size`); `size` and `checksum` describe the original bytes.
/// Directories carry no payload. A deleted entry stays in its slot as a
/// tombstone until the table is vacuumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub id: EntryId,
    pub parent_id: EntryId,

    /// Payload offset in the container (0 for directories)
    pub start_offset: u32,

    /// Uncompressed size in bytes
    pub size: u32,

    /// Reserved for chained payloads, always 0
    pub next_block: u32,

    pub kind: EntryKind,
    pub deleted: bool,

    /// CRC-32 of the uncompressed bytes
    pub checksum: u32,

    /// Stored payload length, method tag included
    pub compressed_size: u32,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub name: String,
}

impl MetadataEntry {
    /// New file entry; the id is assigned on insert
    pub fn file(
        parent_id: EntryId,
        name: impl Into<String>,
        start_offset: u32,
        size: u32,
        compressed_size: u32,
        checksum: u32,
    ) -> Self {
        let now = Utc::now();
        MetadataEntry {
            id: 0,
            parent_id,
            start_offset,
            size,
            next_block: 0,
            kind: EntryKind::File,
            deleted: false,
            checksum,
            compressed_size,
            created: now,
            modified: now,
            name: name.into(),
        }
    }

    /// New directory entry; the id is assigned on insert
    pub fn directory(parent_id: EntryId, name: impl Into<String>) -> Self {
        MetadataEntry {
            kind: EntryKind::Directory,
            ..Self::file(parent_id, name, 0, 0, 0, 0)
        }
    }

    /// The root directory: empty name, no parent
    pub fn root() -> Self {
        Self::directory(0, "")
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }

    /// Serialize to a fixed-size record
    ///
    /// Layout (little-endian): id, parent_id, start_offset, size, next_block
    /// (u32 each), is_directory, is_deleted (u8), checksum, compressed_size
    /// (u32), created, modified (i64 Unix microseconds), then the name as
    /// NUL-padded UTF-16LE.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_SIZE);

        bytes.extend_from_slice(&self.id.to_le_bytes());
        bytes.extend_from_slice(&self.parent_id.to_le_bytes());
        bytes.extend_from_slice(&self.start_offset.to_le_bytes());
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes.extend_from_slice(&self.next_block.to_le_bytes());
        bytes.push(u8::from(self.is_directory()));
        bytes.push(u8::from(self.deleted));
        bytes.extend_from_slice(&self.checksum.to_le_bytes());
        bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
        bytes.extend_from_slice(&to_micros(&self.created).to_le_bytes());
        bytes.extend_from_slice(&to_micros(&self.modified).to_le_bytes());

        for unit in self.name.encode_utf16().take(MAX_NAME_UNITS) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.resize(RECORD_SIZE, 0);

        bytes
    }

    /// Deserialize a record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(ContainerError::InvalidContainer(format!(
                "truncated metadata record: {} of {} bytes",
                bytes.len(),
                RECORD_SIZE
            )));
        }

        let units: Vec<u16> = bytes[NAME_OFFSET..RECORD_SIZE]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        let name = String::from_utf16(&units).map_err(|_| {
            ContainerError::InvalidContainer("metadata name is not valid UTF-16".to_string())
        })?;

        Ok(MetadataEntry {
            id: le_u32(bytes, 0),
            parent_id: le_u32(bytes, 4),
            start_offset: le_u32(bytes, 8),
            size: le_u32(bytes, 12),
            next_block: le_u32(bytes, 16),
            kind: if bytes[20] != 0 {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            deleted: bytes[21] != 0,
            checksum: le_u32(bytes, 22),
            compressed_size: le_u32(bytes, 26),
            created: from_micros(le_i64(bytes, 30))?,
            modified: from_micros(le_i64(bytes, 38))?,
            name,
        })
    }
}

/// Check an entry name for use inside the container
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidName("name is empty".to_string()));
    }

    if name == "." || name == ".." {
        return Err(ContainerError::InvalidName(format!("'{}' is reserved", name)));
    }

    if name.contains(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(ContainerError::InvalidName(format!(
            "'{}' contains a path separator or NUL",
            name
        )));
    }

    let units = name.encode_utf16().count();
    if units > MAX_NAME_UNITS {
        return Err(ContainerError::InvalidName(format!(
            "name is {} UTF-16 units long (max {})",
            units, MAX_NAME_UNITS
        )));
    }

    Ok(())
}

fn to_micros(time: &DateTime<Utc>) -> i64 {
    time.timestamp() * 1_000_000 + i64::from(time.timestamp_subsec_micros())
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;

    Utc.timestamp_opt(secs, nanos).single().ok_or_else(|| {
        ContainerError::InvalidContainer(format!("timestamp {} out of range", micros))
    })
}

fn le_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let mut entry = MetadataEntry::file(1, "a.txt", 8192, 2000, 120, 0xDEAD_BEEF);
        entry.id = 7;

        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(le_u32(&bytes, 0), 7);
        assert_eq!(le_u32(&bytes, 4), 1);
        assert_eq!(le_u32(&bytes, 8), 8192);
        assert_eq!(le_u32(&bytes, 12), 2000);
        assert_eq!(bytes[20], 0);
        assert_eq!(bytes[21], 0);
        assert_eq!(le_u32(&bytes, 22), 0xDEAD_BEEF);
        assert_eq!(le_u32(&bytes, 26), 120);
        assert_eq!(&bytes[NAME_OFFSET..NAME_OFFSET + 4], &[b'a', 0, b'.', 0]);
    }

    #[test]
    fn test_entry_serialization() {
        let mut entry = MetadataEntry::directory(3, "Документи");
        entry.id = 12;
        entry.deleted = true;

        let decoded = MetadataEntry::from_bytes(&entry.to_bytes()).unwrap();
        assert_eq!(decoded.id, 12);
        assert_eq!(decoded.parent_id, 3);
        assert!(decoded.is_directory());
        assert!(!decoded.is_live());
        assert_eq!(decoded.name, "Документи");
        assert_eq!(to_micros(&decoded.created), to_micros(&entry.created));
    }

    #[test]
    fn test_root_entry() {
        let root = MetadataEntry::root();
        assert!(root.is_directory());
        assert_eq!(root.parent_id, 0);

        let decoded = MetadataEntry::from_bytes(&root.to_bytes()).unwrap();
        assert_eq!(decoded.name, "");
    }

    #[test]
    fn test_truncated_record() {
        let bytes = MetadataEntry::root().to_bytes();
        assert!(matches!(
            MetadataEntry::from_bytes(&bytes[..100]),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_UNITS)).is_ok());

        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(validate_name(bad), Err(ContainerError::InvalidName(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_UNITS + 1)).is_err());
    }

    #[test]
    fn test_micros_before_epoch() {
        let time = from_micros(-1_500_000).unwrap();
        assert_eq!(to_micros(&time), -1_500_000);
    }
}
