//! Main container API
//!
//! Combines the free-list allocator, the metadata table and the payload
//! transform into file and directory operations on a single container file.

use crate::allocator::{BlockAllocator, DefragReport, FreeBlock, FreeList};
use crate::catalog::{
    validate_name, DirectoryCursor, EntryId, MetadataEntry, MetadataTable, SlotIndex,
    VacuumReport,
};
use crate::compression;
use crate::config::ContainerConfig;
use crate::error::{ContainerError, Result};
use crate::integrity::Checksum;
use crate::io::{eof_as_integrity, ContainerFile};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: EntryId,
    pub name: String,
    pub is_directory: bool,
    pub size: u32,
    pub compressed_size: u32,
    pub modified: DateTime<Utc>,
}

impl From<MetadataEntry> for ListEntry {
    fn from(entry: MetadataEntry) -> Self {
        ListEntry {
            id: entry.id,
            is_directory: entry.is_directory(),
            size: entry.size,
            compressed_size: entry.compressed_size,
            modified: entry.modified,
            name: entry.name,
        }
    }
}

/// Container statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub container_size: u64,
    pub entry_count: u32,
    pub metadata_capacity: u32,
    pub live_entries: u32,
    pub current_directory_id: EntryId,
    pub free_blocks: u32,
    pub free_bytes: u64,
}

/// Single-file container
///
/// Holds an exclusive lock on the file for its lifetime, so a second
/// `open` of the same path fails with [`ContainerError::Locked`] until this
/// one is closed or dropped. Names passed to file and directory operations
/// are resolved in the process-local working directory.
pub struct Container {
    path: PathBuf,
    config: ContainerConfig,

    /// Disk-backed storage; read-only operations lock it through `&self`
    file: Mutex<ContainerFile>,

    cursor: DirectoryCursor,
}

impl Container {
    /// Create a new container with the default configuration
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, ContainerConfig::default())
    }

    /// Create a new container, truncating anything at `path`
    pub fn create_with<P: AsRef<Path>>(path: P, config: ContainerConfig) -> Result<Self> {
        config.validate()?;

        let mut file = ContainerFile::create(&path, config.header())?;
        FreeList::new(&mut file).initialize()?;
        MetadataTable::new(&mut file).bootstrap()?;
        file.sync()?;

        info!(
            "Created container {:?} ({} metadata slots at {})",
            path.as_ref(),
            config.metadata_capacity,
            config.metadata_start
        );

        Ok(Self::from_parts(path, config, file))
    }

    /// Open a container with the default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ContainerConfig::default())
    }

    /// Open a container, creating it when `path` does not exist
    ///
    /// A file that is not a valid container is an error unless
    /// `config.recreate_invalid` is set, in which case it is replaced by a
    /// new empty container.
    pub fn open_with<P: AsRef<Path>>(path: P, config: ContainerConfig) -> Result<Self> {
        config.validate()?;

        if !path.as_ref().exists() {
            return Self::create_with(path, config);
        }

        match Self::open_existing(path.as_ref()) {
            Ok(file) => Ok(Self::from_parts(path, config, file)),
            Err(ContainerError::InvalidContainer(reason)) if config.recreate_invalid => {
                warn!(
                    "Discarding invalid container {:?} ({}), creating a new one",
                    path.as_ref(),
                    reason
                );
                Self::create_with(path, config)
            }
            Err(err) => Err(err),
        }
    }

    fn open_existing(path: &Path) -> Result<ContainerFile> {
        let mut file = ContainerFile::open(path)?;
        MetadataTable::new(&mut file).load()?;
        FreeList::new(&mut file).header()?;

        info!(
            "Opened container {:?} ({} metadata slots in use)",
            path,
            file.header().entry_count
        );

        Ok(file)
    }

    fn from_parts<P: AsRef<Path>>(path: P, config: ContainerConfig, file: ContainerFile) -> Self {
        Container {
            path: path.as_ref().to_path_buf(),
            config,
            file: Mutex::new(file),
            cursor: DirectoryCursor::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `data` as file `name` in the working directory
    ///
    /// The payload is written before its metadata record. If the record
    /// cannot be inserted the payload block is returned to the free list and
    /// the insert error is reported.
    pub fn import(&mut self, data: &[u8], name: &str) -> Result<EntryId> {
        validate_name(name)?;
        let size = u32::try_from(data.len()).map_err(|_| ContainerError::OutOfSpace)?;
        let parent = self.cursor.current();

        let mut file = self.file.lock();
        if MetadataTable::new(&mut file).find_sibling(parent, name)?.is_some() {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }

        let checksum = Checksum::compute(data);
        let payload = compression::encode(data, &self.config.compression)?;
        let stored = u32::try_from(payload.len()).map_err(|_| ContainerError::OutOfSpace)?;

        let offset = FreeList::new(&mut file).allocate(stored)?;
        let entry = MetadataEntry::file(parent, name, offset, size, stored, checksum.value());

        let inserted = file
            .write_at(u64::from(offset), &payload)
            .and_then(|()| MetadataTable::new(&mut file).insert(entry));

        match inserted {
            Ok((slot, entry)) => {
                debug!(
                    "Imported '{}' as entry {} (slot {}, {} -> {} bytes at {})",
                    name, entry.id, slot, size, stored, offset
                );
                Ok(entry.id)
            }
            Err(err) => {
                warn!("Import of '{}' failed, releasing block at {}: {}", name, offset, err);
                if let Err(free_err) = FreeList::new(&mut file).free(offset, stored) {
                    warn!("Could not release block at {}: {}", offset, free_err);
                }
                Err(err)
            }
        }
    }

    /// Import a file from the host filesystem
    pub fn import_file<P: AsRef<Path>>(&mut self, source: P, name: &str) -> Result<EntryId> {
        let data = std::fs::read(source)?;
        self.import(&data, name)
    }

    /// List the working directory
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        self.list_dir(self.cursor.current())
    }

    /// List the live children of directory `dir_id`
    pub fn list_dir(&self, dir_id: EntryId) -> Result<Vec<ListEntry>> {
        let mut file = self.file.lock();
        let mut table = MetadataTable::new(&mut file);

        let (_, dir) = table
            .find_by_id(dir_id)?
            .ok_or_else(|| ContainerError::NotFound(format!("directory {}", dir_id)))?;
        if !dir.is_directory() {
            return Err(ContainerError::NotADirectory(dir.name));
        }

        Ok(table
            .children(dir_id)?
            .into_iter()
            .map(|(_, entry)| ListEntry::from(entry))
            .collect())
    }

    /// Locate file `name` in the working directory
    fn find_file(&self, table: &mut MetadataTable<'_>, name: &str) -> Result<(SlotIndex, MetadataEntry)> {
        let parent = self.cursor.current();
        if let Some(found) = table.find_by_name(parent, name, false)? {
            return Ok(found);
        }

        if table.find_by_name(parent, name, true)?.is_some() {
            Err(ContainerError::IsADirectory(name.to_string()))
        } else {
            Err(ContainerError::NotFound(name.to_string()))
        }
    }

    /// Delete file `name` and release its payload block
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let mut file = self.file.lock();
        let (slot, entry) = self.find_file(&mut MetadataTable::new(&mut file), name)?;

        MetadataTable::new(&mut file).mark_deleted(slot)?;
        FreeList::new(&mut file).free(entry.start_offset, entry.compressed_size)?;

        debug!("Removed '{}' (entry {})", name, entry.id);
        Ok(())
    }

    /// Read, decode and verify file `name`
    pub fn export(&self, name: &str) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        let (_, entry) = self.find_file(&mut MetadataTable::new(&mut file), name)?;

        let payload = file
            .read_at(u64::from(entry.start_offset), entry.compressed_size as usize)
            .map_err(|err| eof_as_integrity(err, name))?;

        let data = compression::decode(&payload, entry.size as usize).map_err(|err| match err {
            ContainerError::Compression(reason) => {
                ContainerError::IntegrityFailure(format!("{}: {}", name, reason))
            }
            other => other,
        })?;

        if !Checksum::from_value(entry.checksum).verify(&data) {
            return Err(ContainerError::IntegrityFailure(format!(
                "{}: checksum mismatch",
                name
            )));
        }

        Ok(data)
    }

    /// Export file `name` to the host filesystem
    pub fn export_file<P: AsRef<Path>>(&self, name: &str, destination: P) -> Result<()> {
        let data = self.export(name)?;
        std::fs::write(destination, data)?;
        Ok(())
    }

    /// Create subdirectory `name` in the working directory
    pub fn make_directory(&mut self, name: &str) -> Result<EntryId> {
        validate_name(name)?;
        let parent = self.cursor.current();

        let mut file = self.file.lock();
        let mut table = MetadataTable::new(&mut file);
        if table.find_sibling(parent, name)?.is_some() {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }

        let (_, entry) = table.insert(MetadataEntry::directory(parent, name))?;
        debug!("Created directory '{}' as entry {}", name, entry.id);

        Ok(entry.id)
    }

    /// Move the working directory
    ///
    /// Accepts `..`, `/` (or `\`), a subdirectory name, or a `/`-separated
    /// path of those; absolute when it starts with a separator.
    pub fn change_directory(&mut self, path: &str) -> Result<EntryId> {
        let mut file = self.file.lock();
        self.cursor.change_path(&mut MetadataTable::new(&mut file), path)
    }

    pub fn current_directory(&self) -> EntryId {
        self.cursor.current()
    }

    /// Absolute path of the working directory
    pub fn current_path(&self) -> Result<String> {
        let mut file = self.file.lock();
        self.cursor.path(&mut MetadataTable::new(&mut file))
    }

    /// Delete subdirectory `name` with everything below it
    ///
    /// Returns the number of entries removed, the directory included.
    pub fn remove_directory(&mut self, name: &str) -> Result<u32> {
        let parent = self.cursor.current();
        let mut file = self.file.lock();

        let (dir_slot, dir) = {
            let mut table = MetadataTable::new(&mut file);
            match table.find_by_name(parent, name, true)? {
                Some(found) => found,
                None if table.find_by_name(parent, name, false)?.is_some() => {
                    return Err(ContainerError::NotADirectory(name.to_string()))
                }
                None => return Err(ContainerError::NotFound(name.to_string())),
            }
        };

        let descendants = MetadataTable::new(&mut file).descendants(dir.id)?;
        let mut removed = 0u32;
        for (slot, entry) in &descendants {
            MetadataTable::new(&mut file).mark_deleted(*slot)?;
            if entry.is_file() {
                FreeList::new(&mut file).free(entry.start_offset, entry.compressed_size)?;
            }
            removed += 1;
        }

        MetadataTable::new(&mut file).mark_deleted(dir_slot)?;
        removed += 1;

        info!("Removed directory '{}' with {} entries", name, removed);
        Ok(removed)
    }

    /// Coalesce touching free blocks
    pub fn defragment(&mut self) -> Result<DefragReport> {
        let mut file = self.file.lock();
        FreeList::new(&mut file).defragment()
    }

    /// Compact tombstoned metadata slots
    pub fn vacuum(&mut self) -> Result<VacuumReport> {
        let mut file = self.file.lock();
        MetadataTable::new(&mut file).vacuum()
    }

    /// Free blocks in list order
    pub fn free_blocks(&self) -> Result<Vec<FreeBlock>> {
        let mut file = self.file.lock();
        FreeList::new(&mut file).free_blocks()
    }

    pub fn info(&self) -> Result<ContainerInfo> {
        let mut file = self.file.lock();

        let free = FreeList::new(&mut file).free_blocks()?;
        let live_entries = MetadataTable::new(&mut file).scan(|e| e.is_live())?.len() as u32;
        let header = *file.header();

        Ok(ContainerInfo {
            container_size: file.len()?,
            entry_count: header.entry_count,
            metadata_capacity: header.metadata_capacity,
            live_entries,
            current_directory_id: self.cursor.current(),
            free_blocks: free.len() as u32,
            free_bytes: free.iter().map(|b| u64::from(b.size)).sum(),
        })
    }

    /// Sync and release the container file
    pub fn close(self) -> Result<()> {
        let mut file = self.file.into_inner();
        file.sync()?;
        info!("Closed container {:?}", self.path);
        Ok(())
    }
}
