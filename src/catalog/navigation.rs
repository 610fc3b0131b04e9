//! Working-directory cursor

use super::table::MetadataTable;
use super::{EntryId, ROOT_ID};
use crate::error::{ContainerError, Result};

/// Process-local working directory
///
/// Holds only the id of the current directory; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryCursor {
    current: EntryId,
}

impl Default for DirectoryCursor {
    fn default() -> Self {
        DirectoryCursor { current: ROOT_ID }
    }
}

impl DirectoryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> EntryId {
        self.current
    }

    /// Move to the root directory
    pub fn reset(&mut self) {
        self.current = ROOT_ID;
    }

    /// Apply a single navigation step
    ///
    /// `".."` moves to the parent (a no-op at the root), `"/"` or `"\\"`
    /// jumps to the root, anything else must name a live subdirectory of the
    /// current directory.
    pub fn change_directory(&mut self, table: &mut MetadataTable<'_>, target: &str) -> Result<EntryId> {
        match target {
            "/" | "\\" => self.current = ROOT_ID,
            ".." => {
                let (_, entry) = table.find_by_id(self.current)?.ok_or_else(|| {
                    ContainerError::NotFound(format!("current directory {}", self.current))
                })?;
                if entry.parent_id != 0 {
                    self.current = entry.parent_id;
                }
            }
            "." | "" => {}
            name => {
                if let Some((_, dir)) = table.find_by_name(self.current, name, true)? {
                    self.current = dir.id;
                } else if table.find_by_name(self.current, name, false)?.is_some() {
                    return Err(ContainerError::NotADirectory(name.to_string()));
                } else {
                    return Err(ContainerError::NotFound(name.to_string()));
                }
            }
        }

        Ok(self.current)
    }

    /// Follow a `/`-separated path
    ///
    /// A leading separator starts from the root. The cursor only moves if
    /// every component resolves.
    pub fn change_path(&mut self, table: &mut MetadataTable<'_>, path: &str) -> Result<EntryId> {
        let mut next = *self;
        if path.starts_with(is_separator) {
            next.reset();
        }

        for component in path.split(is_separator).filter(|c| !c.is_empty()) {
            next.change_directory(table, component)?;
        }

        *self = next;
        Ok(self.current)
    }

    /// Absolute path of the current directory, e.g. `/docs/2024`
    pub fn path(&self, table: &mut MetadataTable<'_>) -> Result<String> {
        let mut names = Vec::new();
        let mut id = self.current;
        let limit = table.entry_count();

        while id != ROOT_ID {
            if names.len() as u32 >= limit {
                return Err(ContainerError::InvalidContainer(format!(
                    "parent links above directory {} never reach the root",
                    self.current
                )));
            }

            let (_, entry) = table
                .find_by_id(id)?
                .ok_or_else(|| ContainerError::NotFound(format!("directory {}", id)))?;
            names.push(entry.name);
            id = entry.parent_id;
        }

        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetadataEntry;
    use crate::header::Header;
    use crate::io::ContainerFile;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, ContainerFile) {
        let dir = TempDir::new().unwrap();
        let mut file = ContainerFile::create(dir.path().join("nav.bin"), Header::default()).unwrap();
        file.write_at(100, &[0u8; 8]).unwrap();

        let mut table = MetadataTable::new(&mut file);
        table.bootstrap().unwrap();
        let (_, docs) = table.insert(MetadataEntry::directory(ROOT_ID, "docs")).unwrap();
        table.insert(MetadataEntry::directory(docs.id, "2024")).unwrap();
        table.insert(MetadataEntry::file(ROOT_ID, "notes.txt", 0, 0, 0, 0)).unwrap();
        (dir, file)
    }

    #[test]
    fn test_enter_and_leave() {
        let (_dir, mut file) = scratch();
        let mut table = MetadataTable::new(&mut file);
        let mut cursor = DirectoryCursor::new();

        let docs = cursor.change_directory(&mut table, "docs").unwrap();
        assert_ne!(docs, ROOT_ID);
        assert_eq!(cursor.path(&mut table).unwrap(), "/docs");

        assert_eq!(cursor.change_directory(&mut table, "..").unwrap(), ROOT_ID);
        assert_eq!(cursor.path(&mut table).unwrap(), "/");
    }

    #[test]
    fn test_parent_of_root_is_root() {
        let (_dir, mut file) = scratch();
        let mut table = MetadataTable::new(&mut file);
        let mut cursor = DirectoryCursor::new();

        assert_eq!(cursor.change_directory(&mut table, "..").unwrap(), ROOT_ID);
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let (_dir, mut file) = scratch();
        let mut table = MetadataTable::new(&mut file);
        let mut cursor = DirectoryCursor::new();

        assert!(matches!(
            cursor.change_directory(&mut table, "notes.txt"),
            Err(ContainerError::NotADirectory(_))
        ));
        assert!(matches!(
            cursor.change_directory(&mut table, "missing"),
            Err(ContainerError::NotFound(_))
        ));
        assert_eq!(cursor.current(), ROOT_ID);
    }

    #[test]
    fn test_change_path() {
        let (_dir, mut file) = scratch();
        let mut table = MetadataTable::new(&mut file);
        let mut cursor = DirectoryCursor::new();

        cursor.change_path(&mut table, "/docs/2024").unwrap();
        assert_eq!(cursor.path(&mut table).unwrap(), "/docs/2024");

        cursor.change_directory(&mut table, "\\").unwrap();
        assert_eq!(cursor.current(), ROOT_ID);
    }

    #[test]
    fn test_change_path_is_all_or_nothing() {
        let (_dir, mut file) = scratch();
        let mut table = MetadataTable::new(&mut file);
        let mut cursor = DirectoryCursor::new();

        cursor.change_directory(&mut table, "docs").unwrap();
        let before = cursor;

        assert!(cursor.change_path(&mut table, "/docs/missing").is_err());
        assert_eq!(cursor, before);
    }
}
