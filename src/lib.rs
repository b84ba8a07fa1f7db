//! # vaultpack - Single-File Encrypted Virtual Archive
//!
//! `vaultpack` stores a whole folder/file tree inside one container file.
//! File content lives in fixed-size blocks, the tree itself (the inventory)
//! is kept in a metadata section after the last used block and can be sealed
//! with a password-derived key.
//!
//! - **Block allocation** reusing freed space and truncating the tail
//! - **Per-file ciphers** (AES or Twofish in CTR mode) and compression (LZ4, Zstd)
//! - **Password protected inventories** with PBKDF2 or scrypt key derivation
//! - **Integrity digests** (SHA-256 of the plaintext) checked on read
//! - **Crash recovery**: an interrupted write still leaves readable metadata
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vaultpack::{Archive, Result};
//!
//! # fn main() -> Result<()> {
//! let mut archive = Archive::create("notes.vpk")?;
//!
//! archive.write("/documents/report.txt", b"Hello, World!")?;
//! let content = archive.read("/documents/report.txt")?;
//! let entries = archive.list("/documents")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Password Protected Archives
//!
//! ```rust,no_run
//! use vaultpack::{ArchiveBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut archive = ArchiveBuilder::new()
//!     .path("secrets.vpk")
//!     .password("correct horse battery staple")
//!     .block_size(4096)
//!     .build()?;
//!
//! archive.write("/keys.txt", b"content")?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    cipher::Encryption,
    compression::CompressionMethod,
    context::ArchiveContext,
    descriptor::Descriptor,
    header::DEFAULT_BLOCK_SIZE,
    inventory::{FileEntry, FolderEntry, Inventory},
    security::{PasswordProvider, SecurityProvider, UserSecurityProvider},
    stream::{open_read_stream, open_write_stream, ReadStream, WriteOptions, WriteStream},
};
pub use crate::error::{ArchiveError, ErrorCategory, Result};

use crate::core::descriptor::DEFAULT_PBKDF2_ITERATIONS;
use crate::core::inventory::pather;
use crate::core::metadata::ProtectedMetadataWrite;
use crate::core::stream::{from_io, open_write_stream_with};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A file or folder as seen by [`Archive::list`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Absolute path in the archive (e.g. "/research/notes/overview.txt")
    pub path: String,

    pub name: String,

    /// Path of the containing folder ("/" for top-level entries)
    pub parent: String,

    pub is_dir: bool,

    /// Plaintext size in bytes (None for folders)
    pub size: Option<u64>,

    /// Bytes of block space held in the container (None for folders)
    pub size_on_disk: Option<u64>,

    /// Last modification as Unix epoch milliseconds (None for folders)
    pub modified: Option<i64>,

    pub media_type: Option<String>,
}

impl ArchiveEntry {
    fn folder(parent: &str, folder: &FolderEntry) -> Self {
        ArchiveEntry {
            path: pather::join(parent, &folder.name),
            name: folder.name.clone(),
            parent: parent.to_string(),
            is_dir: true,
            size: None,
            size_on_disk: None,
            modified: None,
            media_type: None,
        }
    }

    fn file(parent: &str, file: &FileEntry) -> Self {
        ArchiveEntry {
            path: pather::join(parent, &file.name),
            name: file.name.clone(),
            parent: parent.to_string(),
            is_dir: false,
            size: Some(file.actual_size),
            size_on_disk: Some(file.size_on_disk),
            modified: Some(file.modified_at),
            media_type: Some(file.media_type.clone()),
        }
    }
}

/// High-level handle on an archive file
///
/// Wraps an [`ArchiveContext`] together with the security provider and the
/// random source every write needs. Content writes run inside a
/// [`ProtectedMetadataWrite`] session, so metadata is persisted even when a
/// write fails halfway.
pub struct Archive {
    context: ArchiveContext,
    provider: Arc<dyn SecurityProvider>,
    rng: Box<dyn RngCore + Send>,
}

impl Archive {
    /// Create a plaintext archive with the default block size
    ///
    /// An existing file at `path` is replaced.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        ArchiveBuilder::new().path(path.as_ref()).build()
    }

    /// Open an existing archive
    pub fn open<P: AsRef<Path>>(path: P, provider: Arc<dyn SecurityProvider>) -> Result<Self> {
        let context = ArchiveContext::open(path, provider.as_ref())?;
        Ok(Archive {
            context,
            provider,
            rng: Box::new(StdRng::from_entropy()),
        })
    }

    /// Open an archive whose inventory is sealed with `password`
    pub fn open_with_password<P: AsRef<Path>>(path: P, password: impl AsRef<[u8]>) -> Result<Self> {
        Self::open(path, Arc::new(UserSecurityProvider::with_password(password)))
    }

    /// Open a plaintext archive
    pub fn open_plaintext<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, Arc::new(UserSecurityProvider::no_password()))
    }

    pub fn builder() -> ArchiveBuilder {
        ArchiveBuilder::new()
    }

    /// Write `content` to the file at `path`, replacing what was there
    ///
    /// Missing parent folders are created.
    pub fn write<P: AsRef<str>>(&mut self, path: P, content: &[u8]) -> Result<()> {
        self.write_from(path, content, WriteOptions::default())
            .map(|_| ())
    }

    /// Like [`write`](Self::write) with a per-file cipher or compression
    pub fn write_with<P: AsRef<str>>(
        &mut self,
        path: P,
        content: &[u8],
        options: WriteOptions,
    ) -> Result<()> {
        self.write_from(path, content, options).map(|_| ())
    }

    /// Stream everything `reader` yields into the file at `path`
    ///
    /// Returns the number of plaintext bytes stored.
    pub fn write_from<P: AsRef<str>, R: Read>(
        &mut self,
        path: P,
        mut reader: R,
        options: WriteOptions,
    ) -> Result<u64> {
        let path = path.as_ref();
        debug!("Writing {}", path);

        let mut session = ProtectedMetadataWrite::begin(&mut self.context, self.provider.clone());
        if !session.inventory.exists(path) {
            let parent = pather::dirname(path)?;
            if parent != "/" && !session.inventory.exists(&parent) {
                session.inventory.create_folder(&parent, true)?;
            }
            session.inventory.create_file(path)?;
        }

        let written = {
            let mut stream = open_write_stream_with(&mut session, path, options, self.rng.as_mut())?;
            let written = io::copy(&mut reader, &mut stream).map_err(from_io)?;
            stream.close()?;
            written
        };
        session.close()?;

        info!("Wrote {} bytes to {}", written, path);
        Ok(written)
    }

    /// Read the whole file at `path` without checking its digest
    pub fn read<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        self.read_content(path.as_ref(), false)
    }

    /// Read the whole file at `path`, failing with
    /// [`ArchiveError::IntegrityMismatch`] if it does not match its digest
    pub fn read_verified<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        self.read_content(path.as_ref(), true)
    }

    fn read_content(&self, path: &str, verify: bool) -> Result<Vec<u8>> {
        let mut stream = open_read_stream(&self.context, path, verify)?;
        let expected = stream.entry().actual_size;

        let mut content = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
        stream.read_to_end(&mut content).map_err(from_io)?;
        if content.len() as u64 != expected {
            warn!(
                "Read {} of {} bytes from {}",
                content.len(),
                expected,
                path
            );
            return Err(ArchiveError::IntegrityMismatch {
                path: path.to_string(),
            });
        }

        stream.close()?;
        Ok(content)
    }

    /// SHA-256 of the file's plaintext, computed from its stored content
    pub fn hash<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        let mut stream = open_read_stream(&self.context, path.as_ref(), false)?;
        let mut hasher = Sha256::new();
        io::copy(&mut stream, &mut hasher).map_err(from_io)?;
        stream.close()?;
        Ok(hasher.finalize().to_vec())
    }

    /// Remove a file, or a folder with everything below it
    ///
    /// Freed blocks are reused by later writes; trailing ones are truncated
    /// away immediately.
    pub fn delete<P: AsRef<str>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.context.inventory.remove(path)?;
        info!("Deleted {}", path);
        self.save()
    }

    /// Create a folder; with `parents`, missing ancestors are created too
    /// and an existing folder is not an error
    pub fn mkdir<P: AsRef<str>>(&mut self, path: P, parents: bool) -> Result<()> {
        let path = path.as_ref();
        self.context.inventory.create_folder(path, parents)?;
        debug!("Created folder {}", path);
        self.save()
    }

    /// Move or rename an entry
    pub fn mv<P: AsRef<str>, Q: AsRef<str>>(&mut self, from: P, to: Q) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        self.context.inventory.move_entry(from, to)?;
        debug!("Moved {} to {}", from, to);
        self.save()
    }

    /// Immediate children of the folder at `path`, folders first, each
    /// group sorted by name
    pub fn list<P: AsRef<str>>(&self, path: P) -> Result<Vec<ArchiveEntry>> {
        let path = path.as_ref();
        let folder = self.context.inventory.folder(path)?;
        let parent = if pather::split(path)?.is_empty() {
            "/".to_string()
        } else {
            path.trim_end_matches('/').to_string()
        };

        let mut folders: Vec<ArchiveEntry> = folder
            .folders
            .iter()
            .map(|f| ArchiveEntry::folder(&parent, f))
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files: Vec<ArchiveEntry> = folder
            .files
            .iter()
            .map(|f| ArchiveEntry::file(&parent, f))
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        folders.extend(files);
        Ok(folders)
    }

    pub fn exists<P: AsRef<str>>(&self, path: P) -> bool {
        self.context.inventory.exists(path.as_ref())
    }

    pub fn is_dir<P: AsRef<str>>(&self, path: P) -> bool {
        self.context
            .inventory
            .resolve(path.as_ref())
            .is_ok_and(|entry| entry.is_folder())
    }

    /// Inventory entry of the file at `path`
    pub fn metadata<P: AsRef<str>>(&self, path: P) -> Result<&FileEntry> {
        self.context.inventory.file(path.as_ref())
    }

    /// Add a tag to a file, returning false if it was already there
    pub fn tag<P: AsRef<str>>(&mut self, path: P, tag: &str) -> Result<bool> {
        let added = self.context.inventory.file_mut(path.as_ref())?.add_tag(tag);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn untag<P: AsRef<str>>(&mut self, path: P, tag: &str) -> Result<bool> {
        let removed = self.context.inventory.file_mut(path.as_ref())?.remove_tag(tag);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn set_media_type<P: AsRef<str>>(&mut self, path: P, media_type: &str) -> Result<()> {
        self.context.inventory.file_mut(path.as_ref())?.media_type = media_type.to_string();
        self.save()
    }

    /// Files whose cipher differs from the archive's default file cipher,
    /// with the cipher they are stored under
    pub fn outdated_encryption(&self) -> Vec<(String, Encryption)> {
        let wanted = self.context.inventory.default_encryption;
        let mut outdated = Vec::new();
        collect_files(&self.context.inventory.root, "/", &mut |path, file| {
            if file.encryption != wanted {
                outdated.push((path, file.encryption));
            }
        });
        outdated
    }

    /// Rewrite a file under the archive's default file cipher
    pub fn reencrypt<P: AsRef<str>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.read_verified(path)?;
        let options =
            WriteOptions::default().encryption(self.context.inventory.default_encryption);
        self.write_with(path, &content, options)
    }

    /// Change the inventory protection (password or scheme) and persist it
    pub fn set_security(
        &mut self,
        descriptor: Descriptor,
        provider: Arc<dyn SecurityProvider>,
    ) -> Result<()> {
        info!("Changing archive security to {}", descriptor.identifier());
        self.context.set_descriptor(descriptor)?;
        self.provider = provider;
        self.save()
    }

    /// Cipher and compression for files created from now on
    pub fn set_defaults(
        &mut self,
        encryption: Encryption,
        compression: CompressionMethod,
    ) -> Result<()> {
        self.context.inventory.default_encryption = encryption;
        self.context.inventory.default_compression = compression;
        self.save()
    }

    /// Persist the inventory
    pub fn save(&mut self) -> Result<()> {
        self.context.save(self.provider.as_ref())
    }

    /// Reload metadata from disk, discarding unsaved changes
    pub fn refresh(&mut self) -> Result<()> {
        self.context.refresh(self.provider.as_ref())
    }

    pub fn block_size(&self) -> u32 {
        self.context.block_size()
    }

    /// Length of the data-block region as of the last save
    pub fn block_data_length(&self) -> u64 {
        self.context.block_data_length()
    }

    pub fn path(&self) -> &Path {
        self.context.path()
    }

    /// Get direct access to the underlying context (for advanced usage)
    pub fn context(&self) -> &ArchiveContext {
        &self.context
    }

    /// Mutable access to the underlying context; inventory changes made
    /// here are persisted by the next [`save`](Self::save)
    pub fn context_mut(&mut self) -> &mut ArchiveContext {
        &mut self.context
    }
}

fn collect_files(folder: &FolderEntry, path: &str, visit: &mut dyn FnMut(String, &FileEntry)) {
    for file in &folder.files {
        visit(pather::join(path, &file.name), file);
    }
    for child in &folder.folders {
        collect_files(child, &pather::join(path, &child.name), visit);
    }
}

/// Builder for creating archives with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use vaultpack::{ArchiveBuilder, CompressionMethod};
///
/// # fn main() -> vaultpack::Result<()> {
/// let archive = ArchiveBuilder::new()
///     .path("data.vpk")
///     .block_size(4096)
///     .default_compression(CompressionMethod::Zstd)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    path: Option<PathBuf>,
    block_size: u32,
    descriptor: Option<Descriptor>,
    provider: Option<Arc<dyn SecurityProvider>>,
    default_encryption: Option<Encryption>,
    default_compression: Option<CompressionMethod>,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        ArchiveBuilder {
            path: None,
            block_size: DEFAULT_BLOCK_SIZE,
            descriptor: None,
            provider: None,
            default_encryption: None,
            default_compression: None,
            rng: None,
        }
    }

    /// Where the archive file is created (required)
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Block size in bytes: a power of two from 256 to 1 MiB
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Inventory protection scheme
    ///
    /// Without one, the archive is plaintext unless a password is set, in
    /// which case PBKDF2 with AES-256 is used.
    pub fn descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Seal the inventory with this password
    pub fn password(self, password: impl AsRef<[u8]>) -> Self {
        self.provider(Arc::new(UserSecurityProvider::with_password(password)))
    }

    pub fn provider(mut self, provider: Arc<dyn SecurityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Cipher for new files (defaults to the descriptor's algorithm)
    pub fn default_encryption(mut self, encryption: Encryption) -> Self {
        self.default_encryption = Some(encryption);
        self
    }

    pub fn default_compression(mut self, compression: CompressionMethod) -> Self {
        self.default_compression = Some(compression);
        self
    }

    /// Random source for salts, keys and IVs (seed it for reproducible tests)
    pub fn rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    /// Create the archive file and return a handle on it
    pub fn build(self) -> Result<Archive> {
        let path = self.path.ok_or_else(|| {
            ArchiveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path must be set",
            ))
        })?;
        let mut rng = self
            .rng
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()));
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(UserSecurityProvider::no_password()));

        let descriptor = match self.descriptor {
            Some(descriptor) => descriptor,
            None if provider.password().is_ok() => {
                Descriptor::pbkdf2(DEFAULT_PBKDF2_ITERATIONS, Encryption::Aes256Ctr, rng.as_mut())?
            }
            None => Descriptor::Plaintext,
        };

        info!(
            "Building archive at {:?} ({}, block size {})",
            path,
            descriptor.identifier(),
            self.block_size
        );

        let mut context =
            ArchiveContext::create(&path, descriptor, self.block_size, provider.as_ref())?;

        if self.default_encryption.is_some() || self.default_compression.is_some() {
            if let Some(encryption) = self.default_encryption {
                context.inventory.default_encryption = encryption;
            }
            if let Some(compression) = self.default_compression {
                context.inventory.default_compression = compression;
            }
            context.save(provider.as_ref())?;
            debug!(
                "File defaults: {:?}, {:?}",
                context.inventory.default_encryption, context.inventory.default_compression
            );
        }

        Ok(Archive {
            context,
            provider,
            rng,
        })
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
