//! The folder/file tree stored in the archive's metadata section
//!
//! The tree is a plain owned structure: folders own their child files and
//! folders, and an [`EntryRef`]/[`Entry`] tagged union is what traversal
//! hands back. There are no parent pointers; the parent of an entry is
//! whatever folder its path's dirname resolves to.

pub(crate) mod b64;
pub mod pather;

use crate::core::allocator::extent::IntervalSet;
use crate::core::cipher::Encryption;
use crate::core::compression::CompressionMethod;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub use pather::{basename, dirname};

/// Media type recorded for files whose content type was never set
pub const MEDIA_TYPE_UNKNOWN: &str = "application/octet-stream";

/// Name and identity shared by files and folders
pub trait NamedEntry {
    fn name(&self) -> &str;
    fn uuid(&self) -> Uuid;
    fn set_name(&mut self, name: String);
}

/// A file in the archive
///
/// Everything about the file except its content: where the content lives
/// (`blocks`), how it was stored (compression, encryption parameters) and
/// the digest used to verify it on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,

    pub uuid: Uuid,

    /// Block ids holding the stored content, read in ascending order
    pub blocks: IntervalSet,

    /// Bytes occupied in the data region (block count * block size)
    pub size_on_disk: u64,

    /// Plaintext length
    pub actual_size: u64,

    /// Last modified timestamp (Unix epoch milliseconds)
    pub modified_at: i64,

    /// Cipher applied to the stored content
    pub encryption: Encryption,

    /// Key followed by IV, freshly generated on every write
    #[serde(default, with = "b64::option")]
    pub encryption_data: Option<Vec<u8>>,

    /// SHA-256 of the plaintext
    #[serde(default, with = "b64::option")]
    pub integrity_hash: Option<Vec<u8>>,

    #[serde(default)]
    pub compression: CompressionMethod,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    pub media_type: String,
}

impl FileEntry {
    /// Create an empty file with a fresh identity
    pub fn new(name: impl Into<String>) -> Self {
        FileEntry {
            name: name.into(),
            uuid: Uuid::new_v4(),
            blocks: IntervalSet::new(),
            size_on_disk: 0,
            actual_size: 0,
            modified_at: chrono::Utc::now().timestamp_millis(),
            encryption: Encryption::None,
            encryption_data: None,
            integrity_hash: None,
            compression: CompressionMethod::None,
            tags: BTreeSet::new(),
            media_type: MEDIA_TYPE_UNKNOWN.to_string(),
        }
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl NamedEntry for FileEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// A folder in the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,

    pub uuid: Uuid,

    #[serde(default)]
    pub files: Vec<FileEntry>,

    #[serde(default)]
    pub folders: Vec<FolderEntry>,
}

impl FolderEntry {
    pub fn new(name: impl Into<String>) -> Self {
        FolderEntry {
            name: name.into(),
            uuid: Uuid::new_v4(),
            files: Vec::new(),
            folders: Vec::new(),
        }
    }

    /// The unnamed root folder
    fn root() -> Self {
        FolderEntry {
            name: String::new(),
            uuid: Uuid::nil(),
            files: Vec::new(),
            folders: Vec::new(),
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn file_mut(&mut self, name: &str) -> Option<&mut FileEntry> {
        self.files.iter_mut().find(|f| f.name == name)
    }

    pub fn folder(&self, name: &str) -> Option<&FolderEntry> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn folder_mut(&mut self, name: &str) -> Option<&mut FolderEntry> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.file(name).is_some()
    }

    pub fn has_folder(&self, name: &str) -> bool {
        self.folder(name).is_some()
    }

    /// Check for a file or a folder with this name
    pub fn has_entry(&self, name: &str) -> bool {
        self.has_file(name) || self.has_folder(name)
    }

    /// Look up a direct child of either kind
    pub fn child(&self, name: &str) -> Option<EntryRef<'_>> {
        if let Some(folder) = self.folder(name) {
            return Some(EntryRef::Folder(folder));
        }
        self.file(name).map(EntryRef::File)
    }

    /// Attach an entry, refusing names already used by a sibling
    pub fn attach(&mut self, entry: Entry) -> Result<()> {
        pather::validate_name(entry.name())?;
        if self.has_entry(entry.name()) {
            return Err(ArchiveError::NameConflict {
                path: self.name.clone(),
                name: entry.name().to_string(),
            });
        }
        match entry {
            Entry::File(file) => self.files.push(file),
            Entry::Folder(folder) => self.folders.push(folder),
        }
        Ok(())
    }

    /// Detach a direct child of either kind
    pub fn detach(&mut self, name: &str) -> Option<Entry> {
        if let Some(pos) = self.folders.iter().position(|f| f.name == name) {
            return Some(Entry::Folder(self.folders.remove(pos)));
        }
        if let Some(pos) = self.files.iter().position(|f| f.name == name) {
            return Some(Entry::File(self.files.remove(pos)));
        }
        None
    }

    /// Every file below this folder, depth first
    pub fn files_recursive(&self) -> Files<'_> {
        Files {
            current: self.files.iter(),
            pending: self.folders.iter().collect(),
        }
    }
}

impl NamedEntry for FolderEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// Depth-first iterator over the files of a folder tree
pub struct Files<'a> {
    current: std::slice::Iter<'a, FileEntry>,
    pending: Vec<&'a FolderEntry>,
}

impl<'a> Iterator for Files<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.current.next() {
                return Some(file);
            }
            let folder = self.pending.pop()?;
            self.current = folder.files.iter();
            self.pending.extend(folder.folders.iter());
        }
    }
}

/// An owned file or folder, detached from the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(FileEntry),
    Folder(FolderEntry),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(f) => &f.name,
            Entry::Folder(f) => &f.name,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Entry::File(f) => f.uuid,
            Entry::Folder(f) => f.uuid,
        }
    }

    pub fn set_name(&mut self, name: String) {
        match self {
            Entry::File(f) => f.set_name(name),
            Entry::Folder(f) => f.set_name(name),
        }
    }
}

/// A borrowed file or folder, as returned by traversal
#[derive(Debug, Clone, Copy)]
pub enum EntryRef<'a> {
    File(&'a FileEntry),
    Folder(&'a FolderEntry),
}

impl<'a> EntryRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            EntryRef::File(f) => &f.name,
            EntryRef::Folder(f) => &f.name,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            EntryRef::File(f) => f.uuid,
            EntryRef::Folder(f) => f.uuid,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, EntryRef::File(_))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, EntryRef::Folder(_))
    }
}

/// The whole archive tree plus archive-wide defaults for new files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub root: FolderEntry,

    /// Cipher applied to files written without an explicit override
    #[serde(default)]
    pub default_encryption: Encryption,

    /// Compression applied to files written without an explicit override
    #[serde(default)]
    pub default_compression: CompressionMethod,
}

impl Default for Inventory {
    fn default() -> Self {
        Inventory::new(Encryption::None)
    }
}

impl Inventory {
    pub fn new(default_encryption: Encryption) -> Self {
        Inventory {
            root: FolderEntry::root(),
            default_encryption,
            default_compression: CompressionMethod::None,
        }
    }

    /// Every file in the archive, depth first
    pub fn files(&self) -> Files<'_> {
        self.root.files_recursive()
    }

    /// Resolve a path to a file or folder
    pub fn resolve(&self, path: &str) -> Result<EntryRef<'_>> {
        pather::traverse(&self.root, path)
    }

    /// Resolve a path that must name a folder
    pub fn folder(&self, path: &str) -> Result<&FolderEntry> {
        match self.resolve(path)? {
            EntryRef::Folder(folder) => Ok(folder),
            EntryRef::File(_) => Err(ArchiveError::NotAFolder {
                path: path.to_string(),
            }),
        }
    }

    pub fn folder_mut(&mut self, path: &str) -> Result<&mut FolderEntry> {
        pather::traverse_folder_mut(&mut self.root, path)
    }

    /// Resolve a path that must name a file
    pub fn file(&self, path: &str) -> Result<&FileEntry> {
        match self.resolve(path)? {
            EntryRef::File(file) => Ok(file),
            EntryRef::Folder(_) => Err(ArchiveError::NotAFile {
                path: path.to_string(),
            }),
        }
    }

    pub fn file_mut(&mut self, path: &str) -> Result<&mut FileEntry> {
        let name = pather::basename(path)?;
        let parent = pather::dirname(path)?;
        let folder = self.folder_mut(&parent)?;
        if folder.has_folder(name) {
            return Err(ArchiveError::NotAFile {
                path: path.to_string(),
            });
        }
        folder.file_mut(name).ok_or_else(|| ArchiveError::NotFound {
            path: path.to_string(),
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn find_file_by_uuid(&self, uuid: Uuid) -> Option<&FileEntry> {
        self.files().find(|f| f.uuid == uuid)
    }

    /// Create a folder, optionally creating missing parents (`mkdir -p`)
    pub fn create_folder(&mut self, path: &str, parents: bool) -> Result<()> {
        let segments = pather::split(path)?;
        if segments.is_empty() {
            return Err(ArchiveError::InvalidPath(path.to_string()));
        }

        let mut current = &mut self.root;
        let mut walked = String::new();
        let last = segments.len() - 1;
        for (i, segment) in segments.into_iter().enumerate() {
            walked.push('/');
            walked.push_str(segment);

            if current.has_file(segment) {
                return Err(if i == last {
                    ArchiveError::NameConflict {
                        path: pather::dirname(&walked)?,
                        name: segment.to_string(),
                    }
                } else {
                    ArchiveError::NotAFolder { path: walked }
                });
            }

            if !current.has_folder(segment) {
                if i != last && !parents {
                    return Err(ArchiveError::NotFound { path: walked });
                }
                current.attach(Entry::Folder(FolderEntry::new(segment)))?;
            } else if i == last && !parents {
                return Err(ArchiveError::NameConflict {
                    path: pather::dirname(&walked)?,
                    name: segment.to_string(),
                });
            }

            current = match current.folder_mut(segment) {
                Some(folder) => folder,
                None => return Err(ArchiveError::NotFound { path: walked }),
            };
        }
        Ok(())
    }

    /// Add an empty file at `path`, returning it for further setup
    pub fn create_file(&mut self, path: &str) -> Result<&mut FileEntry> {
        let name = pather::basename(path)?.to_string();
        let parent = pather::dirname(path)?;
        let default_encryption = self.default_encryption;
        let default_compression = self.default_compression;

        let folder = self.folder_mut(&parent)?;
        let mut file = FileEntry::new(name.clone());
        file.encryption = default_encryption;
        file.compression = default_compression;
        folder.attach(Entry::File(file))?;

        folder.file_mut(&name).ok_or(ArchiveError::NotFound {
            path: path.to_string(),
        })
    }

    /// Detach the entry at `path` from the tree
    ///
    /// The blocks of removed files become free on the next allocator rebuild.
    pub fn remove(&mut self, path: &str) -> Result<Entry> {
        let name = pather::basename(path)?;
        let parent = pather::dirname(path)?;
        self.folder_mut(&parent)?
            .detach(name)
            .ok_or_else(|| ArchiveError::NotFound {
                path: path.to_string(),
            })
    }

    /// Move (and possibly rename) the entry at `from` to `to`
    ///
    /// The destination's parent must be an existing folder that has no file
    /// or folder called like the destination's basename. Identity is kept:
    /// only the name changes.
    pub fn move_entry(&mut self, from: &str, to: &str) -> Result<()> {
        let from_name = pather::basename(from)?.to_string();
        let from_parent = pather::dirname(from)?;
        let to_name = pather::basename(to)?.to_string();
        let to_parent = pather::dirname(to)?;
        pather::validate_name(&to_name)?;

        // the source must exist before anything else is checked
        let source = self.resolve(from)?;

        if source.is_folder() && pather::is_within(from, to)? {
            return Err(ArchiveError::InvalidPath(format!(
                "cannot move {} inside itself ({})",
                from, to
            )));
        }

        let destination = self.folder(&to_parent)?;
        if destination.has_entry(&to_name) {
            return Err(ArchiveError::NameConflict {
                path: to_parent,
                name: to_name,
            });
        }

        let mut entry = self
            .folder_mut(&from_parent)?
            .detach(&from_name)
            .ok_or_else(|| ArchiveError::NotFound {
                path: from.to_string(),
            })?;
        entry.set_name(to_name);
        self.folder_mut(&to_parent)?.attach(entry)
    }

    /// Rename an entry in place
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let target = pather::join(&pather::dirname(path)?, new_name);
        self.move_entry(path, &target)
    }
}
