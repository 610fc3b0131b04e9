//! Metadata table and directory navigation
//!
//! Entries are fixed-size records appended to a bounded region that starts at
//! the header's `metadata_start`. The directory tree is expressed purely
//! through `parent_id` links; the root directory has id [`ROOT_ID`] and
//! parent 0.

pub mod entry;
pub mod navigation;
pub mod table;

pub use entry::{validate_name, EntryKind, MetadataEntry};
pub use navigation::DirectoryCursor;
pub use table::{MetadataTable, VacuumReport};

/// Encoded size of one metadata record
pub const RECORD_SIZE: usize = 542;

/// Name field capacity in UTF-16 code units
pub const MAX_NAME_UNITS: usize = 248;

/// Unique, monotonically assigned entry identifier
pub type EntryId = u32;

/// Position of a record in the table (0-based)
pub type SlotIndex = u32;

/// Id of the root directory
pub const ROOT_ID: EntryId = 1;
