//! Fixed-slot metadata table

use super::entry::MetadataEntry;
use super::{EntryId, SlotIndex, RECORD_SIZE, ROOT_ID};
use crate::error::{ContainerError, Result};
use crate::io::ContainerFile;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Outcome of a [`MetadataTable::vacuum`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumReport {
    pub slots_before: u32,
    pub slots_after: u32,
}

/// Metadata table view over a container file
///
/// Slots are appended at `metadata_start + entry_count * RECORD_SIZE` and
/// never reused in place; [`vacuum`](Self::vacuum) is the only pass that
/// reclaims tombstones. The id counter lives in the header, so ids keep
/// increasing across reopen and vacuum.
pub struct MetadataTable<'a> {
    file: &'a mut ContainerFile,
}

impl<'a> MetadataTable<'a> {
    pub fn new(file: &'a mut ContainerFile) -> Self {
        MetadataTable { file }
    }

    /// Slots in use, tombstones included
    pub fn entry_count(&self) -> u32 {
        self.file.header().entry_count
    }

    pub fn capacity(&self) -> u32 {
        self.file.header().metadata_capacity
    }

    fn slot_offset(&self, slot: SlotIndex) -> u64 {
        u64::from(self.file.header().metadata_start) + u64::from(slot) * RECORD_SIZE as u64
    }

    /// Insert the root directory into an empty table
    pub fn bootstrap(&mut self) -> Result<MetadataEntry> {
        let (_, root) = self.insert(MetadataEntry::root())?;
        debug!("Bootstrapped root directory with id {}", root.id);
        Ok(root)
    }

    /// Check the root and reconcile the id counter with the stored records
    pub fn load(&mut self) -> Result<()> {
        let entries = self.read_all()?;

        let root_present = entries
            .iter()
            .any(|e| e.id == ROOT_ID && e.parent_id == 0 && e.is_directory() && e.is_live());
        if !root_present {
            return Err(ContainerError::InvalidContainer(
                "root directory record is missing".to_string(),
            ));
        }

        let max_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
        let stored = self.file.header().next_entry_id;
        if stored <= max_id {
            let next = max_id.checked_add(1).ok_or(ContainerError::OutOfSpace)?;
            if stored == 0 {
                warn!("Container has no stored id counter, continuing from {}", next);
            } else {
                warn!("Stored id counter {} is behind the table, continuing from {}", stored, next);
            }
            self.file.header_mut().next_entry_id = next;
            self.file.write_header()?;
        }

        Ok(())
    }

    /// Read the record at `slot`
    pub fn read_slot(&mut self, slot: SlotIndex) -> Result<MetadataEntry> {
        if slot >= self.entry_count() {
            return Err(ContainerError::NotFound(format!("metadata slot {}", slot)));
        }

        let offset = self.slot_offset(slot);
        let bytes = self
            .file
            .read_at(offset, RECORD_SIZE)
            .map_err(truncated_table)?;
        MetadataEntry::from_bytes(&bytes)
    }

    /// Overwrite the record at `slot`
    pub fn write_slot(&mut self, slot: SlotIndex, entry: &MetadataEntry) -> Result<()> {
        let offset = self.slot_offset(slot);
        self.file.write_at(offset, &entry.to_bytes())
    }

    /// Every record in slot order, tombstones included
    fn read_all(&mut self) -> Result<Vec<MetadataEntry>> {
        let count = self.entry_count() as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let offset = self.slot_offset(0);
        let bytes = self
            .file
            .read_at(offset, count * RECORD_SIZE)
            .map_err(truncated_table)?;
        bytes.chunks_exact(RECORD_SIZE).map(MetadataEntry::from_bytes).collect()
    }

    /// Append `entry` with a freshly assigned id
    pub fn insert(&mut self, mut entry: MetadataEntry) -> Result<(SlotIndex, MetadataEntry)> {
        let header = *self.file.header();
        if header.entry_count >= header.metadata_capacity {
            return Err(ContainerError::MetadataFull {
                capacity: header.metadata_capacity,
            });
        }

        entry.id = header.next_entry_id;
        let slot = header.entry_count;
        self.write_slot(slot, &entry)?;

        let header = self.file.header_mut();
        header.entry_count += 1;
        header.next_entry_id = entry.id.checked_add(1).ok_or(ContainerError::OutOfSpace)?;
        self.file.write_header()?;

        debug!("Inserted entry {} '{}' at slot {}", entry.id, entry.name, slot);

        Ok((slot, entry))
    }

    /// Tombstone the record at `slot`; its payload is left to the caller
    pub fn mark_deleted(&mut self, slot: SlotIndex) -> Result<MetadataEntry> {
        let mut entry = self.read_slot(slot)?;
        entry.deleted = true;
        entry.touch();
        self.write_slot(slot, &entry)?;

        debug!("Tombstoned entry {} '{}' at slot {}", entry.id, entry.name, slot);

        Ok(entry)
    }

    /// All records matching `predicate`, in slot order
    pub fn scan<F>(&mut self, mut predicate: F) -> Result<Vec<(SlotIndex, MetadataEntry)>>
    where
        F: FnMut(&MetadataEntry) -> bool,
    {
        Ok(self
            .read_all()?
            .into_iter()
            .enumerate()
            .filter(|(_, entry)| predicate(entry))
            .map(|(slot, entry)| (slot as SlotIndex, entry))
            .collect())
    }

    fn first<F>(&mut self, predicate: F) -> Result<Option<(SlotIndex, MetadataEntry)>>
    where
        F: FnMut(&MetadataEntry) -> bool,
    {
        Ok(self.scan(predicate)?.into_iter().next())
    }

    /// Live entry with `id`
    pub fn find_by_id(&mut self, id: EntryId) -> Result<Option<(SlotIndex, MetadataEntry)>> {
        self.first(|e| e.is_live() && e.id == id)
    }

    /// First live entry of the wanted kind named `name` under `parent_id`
    pub fn find_by_name(
        &mut self,
        parent_id: EntryId,
        name: &str,
        want_directory: bool,
    ) -> Result<Option<(SlotIndex, MetadataEntry)>> {
        self.first(|e| {
            e.is_live()
                && e.parent_id == parent_id
                && e.is_directory() == want_directory
                && e.name == name
        })
    }

    /// First live entry of either kind named `name` under `parent_id`
    pub fn find_sibling(
        &mut self,
        parent_id: EntryId,
        name: &str,
    ) -> Result<Option<(SlotIndex, MetadataEntry)>> {
        self.first(|e| e.is_live() && e.parent_id == parent_id && e.name == name)
    }

    /// Live direct children of `parent_id`
    pub fn children(&mut self, parent_id: EntryId) -> Result<Vec<(SlotIndex, MetadataEntry)>> {
        // The root is its own tree; it never shows up as a child of 0
        self.scan(|e| e.is_live() && e.parent_id == parent_id && e.id != ROOT_ID)
    }

    /// Live entries below `dir_id` at every depth, breadth first
    pub fn descendants(&mut self, dir_id: EntryId) -> Result<Vec<(SlotIndex, MetadataEntry)>> {
        let live = self.scan(|e| e.is_live())?;

        let mut by_parent: HashMap<EntryId, Vec<usize>> = HashMap::new();
        for (i, (_, entry)) in live.iter().enumerate() {
            if entry.id != ROOT_ID {
                by_parent.entry(entry.parent_id).or_default().push(i);
            }
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from([dir_id]);
        while let Some(parent) = queue.pop_front() {
            // Each entry has exactly one parent, so removing the bucket
            // visits every entry at most once even if links form a loop
            for i in by_parent.remove(&parent).unwrap_or_default() {
                let (slot, entry) = &live[i];
                if entry.is_directory() {
                    queue.push_back(entry.id);
                }
                found.push((*slot, entry.clone()));
            }
        }

        Ok(found)
    }

    /// Compact live records to the front of the table
    ///
    /// Ids and parent links are unchanged; slots past the new count are
    /// zeroed.
    pub fn vacuum(&mut self) -> Result<VacuumReport> {
        let entries = self.read_all()?;
        let slots_before = entries.len() as u32;

        let mut bytes = Vec::with_capacity(entries.len() * RECORD_SIZE);
        let mut slots_after = 0u32;
        for entry in entries.iter().filter(|e| e.is_live()) {
            bytes.extend_from_slice(&entry.to_bytes());
            slots_after += 1;
        }
        bytes.resize(entries.len() * RECORD_SIZE, 0);

        if !bytes.is_empty() {
            let offset = self.slot_offset(0);
            self.file.write_at(offset, &bytes)?;
        }
        self.file.header_mut().entry_count = slots_after;
        self.file.write_header()?;

        info!(
            "Vacuumed metadata table: {} -> {} slots",
            slots_before, slots_after
        );

        Ok(VacuumReport {
            slots_before,
            slots_after,
        })
    }
}

fn truncated_table(err: ContainerError) -> ContainerError {
    match err {
        ContainerError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            ContainerError::InvalidContainer("metadata table is truncated".to_string())
        }
        other => other,
    }
}
