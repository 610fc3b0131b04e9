//! packfs: a filesystem packed into one file
//!
//! Files and directories live inside a single flat container file together
//! with their own space allocator, directory table and integrity checks.
//!
//! ## Features
//!
//! - **In-file free list** with first-fit allocation, in-place splitting and
//!   coalescing defragmentation
//! - **Fixed-size metadata records** with tombstones, parent links and an
//!   explicit vacuum pass
//! - **Per-payload compression**: run-length for small payloads, LZ4 or Zstd
//!   above a threshold
//! - **CRC-32 checksums** verified on every export
//!
//! ## Modules
//!
//! - [`header`] - Container header (offset 0)
//! - [`io`] - File handle, positioned I/O and space reservation
//! - [`allocator`] - Free-list block allocator
//! - [`catalog`] - Metadata table and directory cursor
//! - [`compression`] - Payload transform
//! - [`integrity`] - Checksums
//! - [`container`] - High-level API
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use packfs::Container;
//!
//! let mut container = Container::open("archive.fsc")?;
//!
//! container.make_directory("docs")?;
//! container.change_directory("docs")?;
//! container.import(b"quarterly numbers", "report.txt")?;
//!
//! assert_eq!(container.export("report.txt")?, b"quarterly numbers");
//! container.close()?;
//! # Ok::<(), packfs::ContainerError>(())
//! ```
//!
//! ## Layout
//!
//! ```text
//! 0       header (magic, version, entry count, table start, reservation mark)
//! 100     free-list header (count, head slot)
//! 2048    metadata table (capacity x 542-byte records)
//! ...     data blocks and 12-byte free-list records, reserved on demand
//! ```

pub mod allocator;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod header;
pub mod integrity;
pub mod io;

// Re-export commonly used types
pub use allocator::{BlockAllocator, DefragReport, Extent, FreeBlock, FreeList};
pub use catalog::{DirectoryCursor, EntryId, EntryKind, MetadataEntry, MetadataTable, VacuumReport};
pub use compression::{CompressionConfig, CompressionMethod};
pub use config::ContainerConfig;
pub use container::{Container, ContainerInfo, ListEntry};
pub use error::{ContainerError, Result};
pub use header::Header;
pub use integrity::Checksum;
