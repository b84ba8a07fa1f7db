//! An opened archive: header facts, descriptor and the live inventory

use crate::core::allocator;
use crate::core::descriptor::Descriptor;
use crate::core::header::{validate_block_size, Header};
use crate::core::inventory::Inventory;
use crate::core::io::ContainerFile;
use crate::core::metadata;
use crate::core::security::SecurityProvider;
use crate::error::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// In-memory view of one archive file
///
/// `inventory` is the mutable tree. Changes to it are only persisted by
/// [`save`](Self::save) or by a
/// [`ProtectedMetadataWrite`](crate::core::metadata::ProtectedMetadataWrite)
/// session.
#[derive(Debug)]
pub struct ArchiveContext {
    path: PathBuf,
    block_size: u32,
    descriptor: Descriptor,
    block_data_length: u64,

    /// The folder/file tree
    pub inventory: Inventory,
}

impl ArchiveContext {
    /// Create a new, empty archive file and write its metadata
    ///
    /// New files in a password archive default to the descriptor's cipher;
    /// in a plaintext archive they are stored as-is.
    pub fn create<P: AsRef<Path>>(
        path: P,
        descriptor: Descriptor,
        block_size: u32,
        provider: &dyn SecurityProvider,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!("Creating archive at {:?} (block size {})", path, block_size);

        validate_block_size(block_size)?;
        descriptor.validate()?;

        ContainerFile::create(path, &Header::new(block_size))?;

        let mut context = ArchiveContext {
            path: path.to_path_buf(),
            block_size,
            inventory: Inventory::new(descriptor.algorithm()),
            descriptor,
            block_data_length: 0,
        };
        context.save(provider)?;
        Ok(context)
    }

    /// Open an existing archive, decoding its inventory
    pub fn open<P: AsRef<Path>>(path: P, provider: &dyn SecurityProvider) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening archive at {:?}", path);

        let (header, descriptor, inventory) = read_archive(path, provider)?;
        Ok(ArchiveContext {
            path: path.to_path_buf(),
            block_size: header.block_size,
            descriptor,
            block_data_length: header.used_data_length,
            inventory,
        })
    }

    /// Open the archive at `path`, creating it with the default block size
    /// if no file exists there
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        descriptor: Descriptor,
        provider: &dyn SecurityProvider,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path, provider)
        } else {
            Self::create(path, descriptor, crate::core::header::DEFAULT_BLOCK_SIZE, provider)
        }
    }

    /// Re-read descriptor and inventory from disk, dropping unsaved changes
    pub fn refresh(&mut self, provider: &dyn SecurityProvider) -> Result<()> {
        debug!("Refreshing archive metadata from {:?}", self.path);
        let (header, descriptor, inventory) = read_archive(&self.path, provider)?;
        self.block_size = header.block_size;
        self.block_data_length = header.used_data_length;
        self.descriptor = descriptor;
        self.inventory = inventory;
        Ok(())
    }

    /// Persist descriptor and inventory, truncating unused trailing blocks
    pub fn save(&mut self, provider: &dyn SecurityProvider) -> Result<()> {
        self.block_data_length = metadata::write(
            &self.path,
            &self.inventory,
            &self.descriptor,
            provider,
            self.block_size,
        )?;
        Ok(())
    }

    /// Replace the descriptor (takes effect on the next save)
    ///
    /// Used to change the password or the inventory protection scheme.
    pub fn set_descriptor(&mut self, descriptor: Descriptor) -> Result<()> {
        descriptor.validate()?;
        self.descriptor = descriptor;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Length of the data-block region as of the last read or save
    pub fn block_data_length(&self) -> u64 {
        self.block_data_length
    }
}

/// Read header, descriptor and inventory, in that order
///
/// Nothing past the header is decoded unless signature, version and block
/// size check out.
fn read_archive(path: &Path, provider: &dyn SecurityProvider) -> Result<(Header, Descriptor, Inventory)> {
    let mut container = ContainerFile::open_read_only(path)?;
    let header = container.read_header()?;
    let (descriptor_bytes, inventory_bytes) = container.read_metadata(&header)?;

    let descriptor: Descriptor = serde_json::from_slice(&descriptor_bytes)?;
    descriptor.validate()?;
    let inventory = descriptor.decode_inventory(&inventory_bytes, provider)?;

    let needed = allocator::used_data_length(&inventory, header.block_size)?;
    if needed > header.used_data_length {
        return Err(ArchiveError::MalformedLength(format!(
            "inventory references {} data bytes but the data region holds {}",
            needed, header.used_data_length
        )));
    }

    debug!(
        "Read archive {:?}: {} data bytes, descriptor {}",
        path,
        header.used_data_length,
        descriptor.identifier()
    );
    Ok((header, descriptor, inventory))
}
