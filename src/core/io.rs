//! Disk I/O for archive containers

use crate::core::header::{block_offset, Header, HEADER_SIZE, USED_LENGTH_OFFSET};
use crate::error::{ArchiveError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Length prefix of each metadata section
const SECTION_LENGTH_SIZE: u64 = 4;

/// Disk-backed archive container
pub struct ContainerFile {
    file: File,
    path: PathBuf,
}

impl ContainerFile {
    /// Create a new container file holding only a header
    pub fn create<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(ContainerFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing container file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(ContainerFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing container file without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;

        Ok(ContainerFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Read and validate the header
    ///
    /// Only the signature is looked at when the file is shorter than a
    /// header, so anything that is not an archive fails as such.
    pub fn read_header(&mut self) -> Result<Header> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(HEADER_SIZE as usize);
        (&mut self.file).take(HEADER_SIZE).read_to_end(&mut buffer)?;
        Header::from_bytes(&buffer)
    }

    /// Overwrite the used-data-length field in place
    pub fn write_used_length(&mut self, used_data_length: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(USED_LENGTH_OFFSET))?;
        self.file.write_all(&used_data_length.to_be_bytes())?;
        Ok(())
    }

    /// Read the descriptor and inventory sections that follow the data region
    pub fn read_metadata(&mut self, header: &Header) -> Result<(Vec<u8>, Vec<u8>)> {
        let file_length = self.len()?;
        let mut offset = header.metadata_offset();
        if offset > file_length {
            return Err(ArchiveError::MalformedLength(format!(
                "data region ends at {} but the file is only {} bytes",
                offset, file_length
            )));
        }

        let descriptor = self.read_section(&mut offset, file_length, "descriptor")?;
        let inventory = self.read_section(&mut offset, file_length, "inventory")?;
        Ok((descriptor, inventory))
    }

    fn read_section(&mut self, offset: &mut u64, file_length: u64, what: &str) -> Result<Vec<u8>> {
        if *offset + SECTION_LENGTH_SIZE > file_length {
            return Err(ArchiveError::MalformedLength(format!(
                "{} length field at {} is past the end of the file",
                what, offset
            )));
        }

        self.file.seek(SeekFrom::Start(*offset))?;
        let mut length = [0u8; 4];
        self.file.read_exact(&mut length)?;
        let length = u32::from_be_bytes(length) as u64;

        let start = *offset + SECTION_LENGTH_SIZE;
        if start + length > file_length {
            return Err(ArchiveError::MalformedLength(format!(
                "{} section claims {} bytes but only {} remain",
                what,
                length,
                file_length - start
            )));
        }

        let mut buffer = vec![0u8; length as usize];
        self.file.read_exact(&mut buffer)?;
        *offset = start + length;
        Ok(buffer)
    }

    /// Write one full block at its offset in the data region
    pub fn write_block(&mut self, block_size: u32, block_id: u64, data: &[u8]) -> Result<()> {
        if data.len() != block_size as usize {
            return Err(ArchiveError::MalformedLength(format!(
                "block data must be exactly {} bytes, got {}",
                block_size,
                data.len()
            )));
        }

        self.file.seek(SeekFrom::Start(block_offset(block_size, block_id)))?;
        self.file.write_all(data)?;

        Ok(())
    }

    /// Read one full block from the data region
    pub fn read_block(&mut self, block_size: u32, block_id: u64) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(block_offset(block_size, block_id)))?;

        let mut buffer = vec![0u8; block_size as usize];
        self.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Write raw bytes at an absolute offset
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Cut or extend the file to exactly `length` bytes
    pub fn set_len(&mut self, length: u64) -> Result<()> {
        self.file.set_len(length)?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// The underlying handle, for memory mapping
    pub fn as_file(&self) -> &File {
        &self.file
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush file content (not necessarily file metadata) to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
