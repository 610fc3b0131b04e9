//! Disk I/O for container files

use crate::error::{ContainerError, Result};
use crate::header::{align_up, Header, FREE_LIST_HEADER_SIZE, FREE_LIST_OFFSET, HEADER_SIZE};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Disk-backed container storage
///
/// Owns the read/write handle together with an exclusive advisory lock on
/// it, and the in-memory copy of the header. Every header change is written
/// through immediately, so the file on disk always describes itself. The
/// lock is released when the handle is dropped.
pub struct ContainerFile {
    file: File,
    header: Header,
}

/// Take the exclusive lock without waiting
fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(ContainerError::Locked(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

impl ContainerFile {
    /// Create a new container file, truncating anything at `path`
    ///
    /// The file is only truncated once the lock is held, so a container that
    /// is open elsewhere is left untouched.
    pub fn create<P: AsRef<Path>>(path: P, header: Header) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_exclusive(&file, path.as_ref())?;
        file.set_len(0)?;

        let mut container_file = ContainerFile { file, header };
        container_file.write_header()?;

        Ok(container_file)
    }

    /// Open an existing container file and validate its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        lock_exclusive(&file, path.as_ref())?;
        let len = file.metadata()?.len();

        let mut buffer = vec![0u8; HEADER_SIZE.min(len as usize)];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buffer)?;
        let mut header = Header::from_bytes(&buffer)?;

        if len < u64::from(FREE_LIST_OFFSET + FREE_LIST_HEADER_SIZE) {
            return Err(ContainerError::InvalidContainer(format!(
                "truncated free-list header: file is {} bytes",
                len
            )));
        }

        if header.data_end == 0 {
            let file_end = u32::try_from(len).map_err(|_| ContainerError::OutOfSpace)?;
            header.data_end = file_end.max(header.metadata_end());
            tracing::warn!(
                "Container {:?} has no reservation mark, derived {} from file length",
                path.as_ref(),
                header.data_end
            );
        }

        if header.data_end < header.metadata_end() {
            return Err(ContainerError::InvalidContainer(format!(
                "reservation mark {} lies inside the metadata table (ends at {})",
                header.data_end,
                header.metadata_end()
            )));
        }

        Ok(ContainerFile { file, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable header access; call [`write_header`](Self::write_header) to persist
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Write the header (offset 0)
    pub fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.to_bytes();
        self.write_at(0, &bytes)
    }

    /// Read `len` bytes at `offset`
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Write `data` at `offset`
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;

        Ok(())
    }

    /// Current length of the file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reserve `size` bytes past the high-water mark
    ///
    /// The start is rounded up to `alignment`, the mark moves to the end of
    /// the reserved extent and is persisted before the offset is returned.
    /// Reserved space is never handed out twice, whether or not the caller
    /// has written to it yet.
    pub fn reserve(&mut self, size: u32, alignment: u32) -> Result<u32> {
        let start = align_up(self.header.data_end, alignment).ok_or(ContainerError::OutOfSpace)?;
        let end = start.checked_add(size).ok_or(ContainerError::OutOfSpace)?;

        self.header.data_end = end;
        self.write_header()?;

        Ok(start)
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Map a short read inside a stored region to an integrity failure
pub(crate) fn eof_as_integrity(err: ContainerError, what: &str) -> ContainerError {
    match err {
        ContainerError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            ContainerError::IntegrityFailure(format!("{} extends past end of file", what))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn with_free_list(path: &Path) -> ContainerFile {
        let mut file = ContainerFile::create(path, Header::default()).unwrap();
        file.write_at(u64::from(FREE_LIST_OFFSET), &[0u8; 8]).unwrap();
        file
    }

    #[test]
    fn test_create_and_read_header() {
        let temp = NamedTempFile::new().unwrap();
        let mut header = Header::default();
        header.entry_count = 5;

        {
            let mut file = ContainerFile::create(temp.path(), header).unwrap();
            file.write_at(u64::from(FREE_LIST_OFFSET), &[0u8; 8]).unwrap();
        }

        let file = ContainerFile::open(temp.path()).unwrap();
        assert_eq!(file.header().entry_count, 5);
        assert_eq!(file.header().data_end, header.data_end);
    }

    #[test]
    fn test_write_and_read_at() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = with_free_list(temp.path());

        file.write_at(5000, b"Hello").unwrap();
        assert_eq!(file.read_at(5000, 5).unwrap(), b"Hello");
        assert_eq!(file.len().unwrap(), 5005);
    }

    #[test]
    fn test_reserve_never_overlaps() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = with_free_list(temp.path());
        let base = file.header().data_end;

        let a = file.reserve(100, 4096).unwrap();
        let b = file.reserve(100, 4096).unwrap();

        assert!(a >= base);
        assert_eq!(a % 4096, 0);
        assert_eq!(b % 4096, 0);
        assert!(b >= a + 100);
    }

    #[test]
    fn test_reserve_persists_mark() {
        let temp = NamedTempFile::new().unwrap();
        let end = {
            let mut file = with_free_list(temp.path());
            let slot = file.reserve(12, 12).unwrap();
            assert_eq!(slot % 12, 0);
            file.header().data_end
        };

        let file = ContainerFile::open(temp.path()).unwrap();
        assert_eq!(file.header().data_end, end);
    }

    #[test]
    fn test_reserve_out_of_space() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = with_free_list(temp.path());
        file.header_mut().data_end = u32::MAX - 10;

        assert!(matches!(
            file.reserve(100, 1),
            Err(ContainerError::OutOfSpace)
        ));
    }

    #[test]
    fn test_open_short_file() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"FSCON").unwrap();

        assert!(matches!(
            ContainerFile::open(temp.path()),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_open_missing_free_list_header() {
        let temp = NamedTempFile::new().unwrap();
        ContainerFile::create(temp.path(), Header::default()).unwrap();

        assert!(matches!(
            ContainerFile::open(temp.path()),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_second_handle_is_refused() {
        let temp = NamedTempFile::new().unwrap();
        let _first = with_free_list(temp.path());

        assert!(matches!(
            ContainerFile::open(temp.path()),
            Err(ContainerError::Locked(_))
        ));
        assert!(matches!(
            ContainerFile::create(temp.path(), Header::default()),
            Err(ContainerError::Locked(_))
        ));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = NamedTempFile::new().unwrap();
        drop(with_free_list(temp.path()));

        assert!(ContainerFile::open(temp.path()).is_ok());
    }

    #[test]
    fn test_mark_inside_table_is_rejected() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut file = with_free_list(temp.path());
            file.header_mut().data_end = 100;
            file.write_header().unwrap();
        }

        assert!(matches!(
            ContainerFile::open(temp.path()),
            Err(ContainerError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_legacy_mark_derived_from_length() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut header = Header::default();
            header.data_end = 0;
            let mut file = ContainerFile::create(temp.path(), header).unwrap();
            file.write_at(u64::from(FREE_LIST_OFFSET), &[0u8; 8]).unwrap();
        }

        let file = ContainerFile::open(temp.path()).unwrap();
        assert_eq!(file.header().data_end, Header::default().metadata_end());
    }
}
