//! End-to-end write scenarios: data region accounting, block reuse and
//! truncation, folder operations

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use vaultpack::core::header::{HEADER_SIZE, USED_LENGTH_OFFSET};
use vaultpack::{Archive, ArchiveBuilder, ArchiveError, Result};

fn archive(dir: &tempfile::TempDir, name: &str) -> Result<Archive> {
    ArchiveBuilder::new()
        .path(dir.path().join(name))
        .block_size(1024)
        .rng(StdRng::seed_from_u64(42))
        .build()
}

/// Used data length as stored in the header
fn stored_used_length(path: &Path) -> u64 {
    let bytes = std::fs::read(path).unwrap();
    let at = USED_LENGTH_OFFSET as usize;
    u64::from_be_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Length of the container implied by header and metadata sections
fn expected_file_length(path: &Path) -> u64 {
    let bytes = std::fs::read(path).unwrap();
    let mut offset = (HEADER_SIZE + stored_used_length(path)) as usize;
    for _ in 0..2 {
        let length = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4 + length;
    }
    offset as u64
}

#[test]
fn test_empty_archive() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let archive = archive(&dir, "empty.vpk")?;
    let path = archive.path().to_path_buf();

    assert_eq!(archive.block_data_length(), 0);
    assert_eq!(stored_used_length(&path), 0);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], b"VAULTPAK");
    assert_eq!(&bytes[8..11], &[1, 0, 0]);
    assert_eq!(&bytes[11..15], &1024u32.to_be_bytes());
    assert_eq!(bytes.len() as u64, expected_file_length(&path));

    let at = HEADER_SIZE as usize;
    let descriptor_length = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
    let descriptor: serde_json::Value =
        serde_json::from_slice(&bytes[at + 4..at + 4 + descriptor_length]).unwrap();
    assert_eq!(descriptor["identifier"], "plaintext");

    let reopened = Archive::open_plaintext(&path)?;
    assert!(reopened.list("/")?.is_empty());

    Ok(())
}

#[test]
fn test_single_file_rounds_up_to_blocks() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "single.vpk")?;
    let path = archive.path().to_path_buf();

    archive.write("/a.bin", &vec![0x5a; 3333])?;

    assert_eq!(archive.block_data_length(), 4096);
    assert_eq!(stored_used_length(&path), 4096);
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        expected_file_length(&path)
    );

    let entry = archive.metadata("/a.bin")?;
    assert_eq!(entry.actual_size, 3333);
    assert_eq!(entry.size_on_disk, 4096);
    assert_eq!(entry.blocks.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    Ok(())
}

#[test]
fn test_zero_length_file_holds_no_blocks() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "zero.vpk")?;

    archive.write("/empty", b"")?;
    let entry = archive.metadata("/empty")?;
    assert_eq!(entry.actual_size, 0);
    assert!(entry.blocks.is_empty());
    assert_eq!(archive.block_data_length(), 0);
    assert!(archive.read_verified("/empty")?.is_empty());

    Ok(())
}

#[test]
fn test_tail_truncation_after_shrink_and_delete() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "truncate.vpk")?;
    let path = archive.path().to_path_buf();

    for i in 1..=4u8 {
        archive.write(format!("/file{}", i), &vec![i; 4096])?;
    }
    assert_eq!(archive.block_data_length(), 16384);
    assert_eq!(
        archive.metadata("/file4")?.blocks.iter().collect::<Vec<_>>(),
        vec![12, 13, 14, 15]
    );

    // the rewrite reuses the file's own lowest blocks
    archive.write("/file4", &vec![4u8; 2048])?;
    assert_eq!(
        archive.metadata("/file4")?.blocks.iter().collect::<Vec<_>>(),
        vec![12, 13]
    );
    assert_eq!(archive.block_data_length(), 14336);

    // a hole below the last used block is kept
    archive.delete("/file3")?;
    assert_eq!(archive.block_data_length(), 14336);
    assert_eq!(stored_used_length(&path), 14336);

    archive.delete("/file4")?;
    assert_eq!(archive.block_data_length(), 8192);
    assert_eq!(stored_used_length(&path), 8192);
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        expected_file_length(&path)
    );

    let reopened = Archive::open_plaintext(&path)?;
    assert_eq!(reopened.read_verified("/file1")?, vec![1u8; 4096]);
    assert_eq!(reopened.read_verified("/file2")?, vec![2u8; 4096]);

    Ok(())
}

#[test]
fn test_freed_blocks_are_reused() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "reuse.vpk")?;

    archive.write("/a", &vec![1u8; 2048])?;
    archive.write("/b", &vec![2u8; 2048])?;
    archive.write("/c", &vec![3u8; 1024])?;
    archive.delete("/a")?;

    archive.write("/d", &vec![4u8; 3072])?;
    assert_eq!(
        archive.metadata("/d")?.blocks.iter().collect::<Vec<_>>(),
        vec![0, 1, 5]
    );
    assert_eq!(archive.block_data_length(), 6 * 1024);
    assert_eq!(archive.read_verified("/d")?, vec![4u8; 3072]);
    assert_eq!(archive.read_verified("/c")?, vec![3u8; 1024]);

    Ok(())
}

#[test]
fn test_blocks_are_never_shared() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "disjoint.vpk")?;

    let sizes = [100usize, 5000, 1024, 0, 2049, 7000];
    for (i, size) in sizes.iter().enumerate() {
        archive.write(format!("/dir{}/f", i % 2), &vec![i as u8; *size])?;
        archive.write(format!("/f{}", i), &vec![i as u8; *size])?;
    }
    archive.delete("/f1")?;
    archive.write("/f2", &vec![9u8; 9000])?;

    let mut seen = std::collections::HashSet::new();
    for path in ["/dir0/f", "/dir1/f", "/f0", "/f2", "/f3", "/f4", "/f5"] {
        for id in archive.metadata(path)?.blocks.iter() {
            assert!(seen.insert(id), "block {} owned twice", id);
        }
    }

    Ok(())
}

#[test]
fn test_folder_moves() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "folders.vpk")?;
    let path = archive.path().to_path_buf();

    archive.mkdir("/t1/inner", true)?;
    archive.mkdir("/t2", false)?;
    archive.write("/t1/inner/file.txt", b"moved with its folder")?;
    let uuid = archive.metadata("/t1/inner/file.txt")?.uuid;

    archive.mv("/t1/inner", "/t2/inner")?;
    assert!(!archive.exists("/t1/inner"));
    assert_eq!(archive.metadata("/t2/inner/file.txt")?.uuid, uuid);

    // into itself
    assert!(matches!(
        archive.mv("/t2", "/t2/inner/t2"),
        Err(ArchiveError::InvalidPath(_))
    ));

    // onto an existing name
    archive.mkdir("/t1/inner", false)?;
    assert!(matches!(
        archive.mv("/t1/inner", "/t2/inner"),
        Err(ArchiveError::NameConflict { .. })
    ));

    // into a missing folder
    assert!(matches!(
        archive.mv("/t1", "/missing/t1"),
        Err(ArchiveError::NotFound { .. })
    ));

    // through a file
    assert!(matches!(
        archive.mv("/t1", "/t2/inner/file.txt/t1"),
        Err(ArchiveError::NotAFolder { .. })
    ));

    archive.mv("/t2/inner/file.txt", "/renamed.txt")?;

    let reopened = Archive::open_plaintext(&path)?;
    assert_eq!(reopened.read("/renamed.txt")?, b"moved with its folder");
    assert!(reopened.is_dir("/t2/inner"));
    assert!(reopened.is_dir("/t1/inner"));

    Ok(())
}

#[test]
fn test_mkdir_conflicts() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "mkdir.vpk")?;

    archive.mkdir("/a", false)?;
    assert!(matches!(
        archive.mkdir("/a", false),
        Err(ArchiveError::NameConflict { .. })
    ));
    archive.mkdir("/a", true)?;

    assert!(matches!(
        archive.mkdir("/x/y", false),
        Err(ArchiveError::NotFound { .. })
    ));

    archive.write("/a/file", b"f")?;
    assert!(matches!(
        archive.mkdir("/a/file", true),
        Err(ArchiveError::NameConflict { .. })
    ));
    assert!(matches!(
        archive.mkdir("/a/file/sub", true),
        Err(ArchiveError::NotAFolder { .. })
    ));

    Ok(())
}

#[test]
fn test_delete_folder_frees_its_files() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let mut archive = archive(&dir, "rmdir.vpk")?;

    archive.write("/keep", &vec![1u8; 1024])?;
    archive.write("/tree/a", &vec![2u8; 2048])?;
    archive.write("/tree/sub/b", &vec![3u8; 2048])?;
    assert_eq!(archive.block_data_length(), 5 * 1024);

    archive.delete("/tree")?;
    assert!(!archive.exists("/tree/sub/b"));
    assert_eq!(archive.block_data_length(), 1024);

    Ok(())
}
