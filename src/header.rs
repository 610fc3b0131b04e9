use crate::error::{ContainerError, Result};

pub const MAGIC: [u8; 11] = *b"FSCONTAINER";
pub const FORMAT_VERSION: u32 = 1;

/// Encoded size of the container header
pub const HEADER_SIZE: usize = 35;

/// Fixed position of the free-list header (count + head slot)
pub const FREE_LIST_OFFSET: u32 = 100;
pub const FREE_LIST_HEADER_SIZE: u32 = 8;

pub const DEFAULT_METADATA_START: u32 = 2048;
pub const DEFAULT_METADATA_CAPACITY: u32 = 256;

/// The metadata table may not start inside the free-list header
pub const MIN_METADATA_START: u32 = FREE_LIST_OFFSET + FREE_LIST_HEADER_SIZE;

/// Container header (offset 0)
///
/// Holds the magic tag, format version and the bookkeeping the metadata table
/// and allocator share. The three trailing words were reserved in the first
/// revision of the format; a zero in any of them means "unknown" and is
/// recomputed when the container is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic tag: "FSCONTAINER"
    pub magic: [u8; 11],

    /// Format version
    pub version: u32,

    /// Number of metadata slots ever appended, tombstones included
    pub entry_count: u32,

    /// Offset of the first metadata record
    pub metadata_start: u32,

    /// End of the space reserved so far (data blocks and free-list records)
    pub data_end: u32,

    /// Number of metadata slots the table region can hold
    pub metadata_capacity: u32,

    /// Next id the metadata table hands out
    pub next_entry_id: u32,
}

impl Header {
    pub fn new(metadata_start: u32, metadata_capacity: u32) -> Self {
        let mut header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
            entry_count: 0,
            metadata_start,
            data_end: 0,
            metadata_capacity,
            next_entry_id: 1,
        };
        header.data_end = header.metadata_end();
        header
    }

    /// First byte past the metadata region
    pub fn metadata_end(&self) -> u32 {
        self.metadata_start
            .saturating_add(self.metadata_capacity.saturating_mul(crate::catalog::RECORD_SIZE as u32))
    }

    /// Validate the magic tag, version and table placement
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(ContainerError::InvalidContainer(
                "magic tag mismatch".to_string(),
            ));
        }

        if self.version != FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(self.version));
        }

        if self.metadata_start < MIN_METADATA_START {
            return Err(ContainerError::InvalidContainer(format!(
                "metadata table starts at {} (minimum {})",
                self.metadata_start, MIN_METADATA_START
            )));
        }

        if self.entry_count > self.metadata_capacity {
            return Err(ContainerError::InvalidContainer(format!(
                "entry count {} exceeds metadata capacity {}",
                self.entry_count, self.metadata_capacity
            )));
        }

        Ok(())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.entry_count.to_le_bytes());
        bytes.extend_from_slice(&self.metadata_start.to_le_bytes());
        bytes.extend_from_slice(&self.data_end.to_le_bytes());
        bytes.extend_from_slice(&self.metadata_capacity.to_le_bytes());
        bytes.extend_from_slice(&self.next_entry_id.to_le_bytes());

        bytes
    }

    /// Deserialize header from bytes
    ///
    /// Zeroed reserved words (containers written before they carried
    /// meaning) are filled with defaults; `data_end` is left at zero for the
    /// caller to derive from the file length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ContainerError::InvalidContainer(format!(
                "truncated header: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 11];
        magic.copy_from_slice(&bytes[0..11]);

        let mut header = Header {
            magic,
            version: le_u32(bytes, 11),
            entry_count: le_u32(bytes, 15),
            metadata_start: le_u32(bytes, 19),
            data_end: le_u32(bytes, 23),
            metadata_capacity: le_u32(bytes, 27),
            next_entry_id: le_u32(bytes, 31),
        };

        if header.metadata_capacity == 0 {
            header.metadata_capacity = DEFAULT_METADATA_CAPACITY.max(header.entry_count);
        }

        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_START, DEFAULT_METADATA_CAPACITY)
    }
}

/// Read a little-endian u32 at `offset`
pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// Round `value` up to a multiple of `alignment`
pub(crate) fn align_up(value: u32, alignment: u32) -> Option<u32> {
    let alignment = alignment.max(1);
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = Header::default();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.entry_count, 0);
        assert_eq!(header.metadata_start, DEFAULT_METADATA_START);
        assert_eq!(header.data_end, header.metadata_end());
        assert_eq!(header.next_entry_id, 1);
    }

    #[test]
    fn test_field_offsets() {
        let mut header = Header::default();
        header.entry_count = 7;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..11], b"FSCONTAINER");
        assert_eq!(le_u32(&bytes, 11), 1);
        assert_eq!(le_u32(&bytes, 15), 7);
        assert_eq!(le_u32(&bytes, 19), 2048);
    }

    #[test]
    fn test_header_serialization() {
        let mut header = Header::new(4096, 10);
        header.entry_count = 3;
        header.data_end = 99_999;
        header.next_entry_id = 42;

        let deserialized = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(deserialized, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = Header::default().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = Header::default().to_bytes();
        assert!(matches!(
            Header::from_bytes(&bytes[..20]),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_invalid_version() {
        let mut header = Header::default();
        header.version = 99;
        assert!(matches!(
            header.validate(),
            Err(ContainerError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_metadata_start_inside_free_list_header() {
        let header = Header::new(64, 4);
        assert!(matches!(
            header.validate(),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_legacy_reserved_words() {
        let mut bytes = Header::default().to_bytes();
        // Zero the three reserved words, as the first format revision wrote them
        for b in &mut bytes[23..35] {
            *b = 0;
        }

        let header = Header::from_bytes(&bytes).unwrap();
        assert_eq!(header.metadata_capacity, DEFAULT_METADATA_CAPACITY);
        assert_eq!(header.data_end, 0);
        assert_eq!(header.next_entry_id, 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(13, 12), Some(24));
        assert_eq!(align_up(24, 12), Some(24));
        assert_eq!(align_up(u32::MAX, 4096), None);
    }
}
