//! Corruption detection tests
//!
//! Damages container files on disk and checks that every failure surfaces as
//! a typed error instead of wrong bytes or a hang.

use packfs::allocator::{BlockAllocator, FreeList};
use packfs::catalog::{MetadataTable, ROOT_ID};
use packfs::header::FREE_LIST_OFFSET;
use packfs::io::ContainerFile;
use packfs::{Container, ContainerConfig, ContainerError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

fn patch(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

/// Container holding one uncompressed file; returns its payload offset
fn container_with_file(dir: &TempDir, data: &[u8]) -> (std::path::PathBuf, u32) {
    let path = dir.path().join("damaged.fsc");
    let config = ContainerConfig {
        compression: packfs::CompressionConfig::none(),
        ..Default::default()
    };

    let mut container = Container::create_with(&path, config).unwrap();
    container.import(data, "victim.txt").unwrap();
    container.close().unwrap();

    let mut file = ContainerFile::open(&path).unwrap();
    let (_, entry) = MetadataTable::new(&mut file)
        .find_by_name(ROOT_ID, "victim.txt", false)
        .unwrap()
        .unwrap();
    (path, entry.start_offset)
}

#[test]
fn test_flipped_payload_byte() {
    let dir = TempDir::new().unwrap();
    let (path, offset) = container_with_file(&dir, b"the quick brown fox");

    // Skip the method tag, damage the body
    patch(&path, u64::from(offset) + 5, b"X");

    let container = Container::open(&path).unwrap();
    assert!(matches!(
        container.export("victim.txt"),
        Err(ContainerError::IntegrityFailure(_))
    ));
}

#[test]
fn test_unknown_method_tag() {
    let dir = TempDir::new().unwrap();
    let (path, offset) = container_with_file(&dir, b"tagged payload");

    patch(&path, u64::from(offset), &[0xEE]);

    let container = Container::open(&path).unwrap();
    assert!(matches!(
        container.export("victim.txt"),
        Err(ContainerError::IntegrityFailure(_))
    ));
}

#[test]
fn test_truncated_payload() {
    let dir = TempDir::new().unwrap();
    let (path, offset) = container_with_file(&dir, &[42u8; 300]);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(u64::from(offset) + 10).unwrap();
    drop(file);

    let container = Container::open(&path).unwrap();
    assert!(matches!(
        container.export("victim.txt"),
        Err(ContainerError::IntegrityFailure(_))
    ));
}

#[test]
fn test_bad_magic_is_invalid_container() {
    let dir = TempDir::new().unwrap();
    let (path, _) = container_with_file(&dir, b"data");

    patch(&path, 0, b"NOTACONTAIN");

    assert!(matches!(
        Container::open(&path),
        Err(ContainerError::InvalidContainer(_))
    ));
}

#[test]
fn test_unsupported_version() {
    let dir = TempDir::new().unwrap();
    let (path, _) = container_with_file(&dir, b"data");

    patch(&path, 11, &2u32.to_le_bytes());

    let config = ContainerConfig {
        recreate_invalid: true,
        ..Default::default()
    };
    assert!(matches!(
        Container::open_with(&path, config),
        Err(ContainerError::UnsupportedVersion(2))
    ));
}

#[test]
fn test_recreate_invalid_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.fsc");
    std::fs::write(&path, vec![0xAB; 4096]).unwrap();

    assert!(matches!(
        Container::open(&path),
        Err(ContainerError::InvalidContainer(_))
    ));

    let config = ContainerConfig {
        recreate_invalid: true,
        ..Default::default()
    };
    let mut container = Container::open_with(&path, config).unwrap();
    assert!(container.list().unwrap().is_empty());
    container.import(b"fresh", "new.txt").unwrap();
    assert_eq!(container.export("new.txt").unwrap(), b"fresh");
}

#[test]
fn test_short_file_is_invalid_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.fsc");
    std::fs::write(&path, b"FSCONTAINER").unwrap();

    assert!(matches!(
        Container::open(&path),
        Err(ContainerError::InvalidContainer(_))
    ));
}

#[test]
fn test_free_list_cycle_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cycle.fsc");

    let mut container = Container::create(&path).unwrap();
    container.import(b"one", "1").unwrap();
    container.import(b"two", "2").unwrap();
    container.remove("1").unwrap();
    container.remove("2").unwrap();
    container.close().unwrap();

    // Make the second record point back at the first
    let (head, tail) = {
        let mut file = ContainerFile::open(&path).unwrap();
        let header = FreeList::new(&mut file).header().unwrap();
        let head = header.head.unwrap().position();
        let bytes = file.read_at(u64::from(head) + 8, 4).unwrap();
        (head, u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };
    patch(&path, u64::from(tail) + 8, &head.to_le_bytes());

    let mut container = Container::open(&path).unwrap();
    assert!(matches!(
        container.defragment(),
        Err(ContainerError::CorruptFreeList(_))
    ));
    assert!(matches!(
        container.import(&vec![1u8; 100_000], "big"),
        Err(ContainerError::CorruptFreeList(_))
    ));
}

#[test]
fn test_free_list_head_outside_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dangling.fsc");
    Container::create(&path).unwrap().close().unwrap();

    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&1u32.to_le_bytes());
    header[4..8].copy_from_slice(&0x7FFF_0000u32.to_le_bytes());
    patch(&path, u64::from(FREE_LIST_OFFSET), &header);

    let mut file = ContainerFile::open(&path).unwrap();
    assert!(matches!(
        FreeList::new(&mut file).allocate(64),
        Err(ContainerError::CorruptFreeList(_))
    ));
}

#[test]
fn test_reservation_mark_inside_table_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mark.fsc");

    let mut container = Container::create(&path).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        container.import(name.as_bytes(), name).unwrap();
    }
    container.close().unwrap();

    // data_end lives at offset 23; point it below the end of the table
    patch(&path, 23, &100u32.to_le_bytes());

    assert!(matches!(
        Container::open(&path),
        Err(ContainerError::InvalidContainer(_))
    ));

    // Restoring a mark past the table makes the records readable again
    let table_end = packfs::header::Header::default().metadata_end();
    patch(&path, 23, &table_end.to_le_bytes());
    let container = Container::open(&path).unwrap();
    assert_eq!(container.list().unwrap().len(), 5);
    assert_eq!(container.export("d").unwrap(), b"d");
}
