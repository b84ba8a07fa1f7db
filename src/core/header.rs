use crate::error::{ArchiveError, Result};

pub const MAGIC: [u8; 8] = *b"VAULTPAK";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_BUGFIX: u8 = 0;

/// Block size used when the caller does not pick one
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;
pub const MIN_BLOCK_SIZE: u32 = 256;
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Offset of the used-data-length field
pub const USED_LENGTH_OFFSET: u64 = (MAGIC.len() + 3 + 4) as u64;

/// Size of the fixed header; the data-block region starts right after it
pub const HEADER_SIZE: u64 = USED_LENGTH_OFFSET + 8;

/// Fixed archive header
///
/// ```text
/// [magic: 8][major: 1][minor: 1][bugfix: 1][block_size: u32 BE][used_data_length: u64 BE]
/// ```
///
/// The data-block region follows immediately and is `used_data_length`
/// bytes long; the descriptor and inventory sections come after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic number: "VAULTPAK"
    pub magic: [u8; 8],

    /// Format version (major, minor, bugfix)
    pub version: (u8, u8, u8),

    /// Block size in bytes
    pub block_size: u32,

    /// Bytes of the data-block region in use
    pub used_data_length: u64,
}

impl Header {
    /// Create a new header for an empty archive
    pub fn new(block_size: u32) -> Self {
        Header {
            magic: MAGIC,
            version: (VERSION_MAJOR, VERSION_MINOR, VERSION_BUGFIX),
            block_size,
            used_data_length: 0,
        }
    }

    /// Validate magic, version and block size
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(ArchiveError::InvalidSignature);
        }

        // Same major, and no minor from the future
        let (major, minor, bugfix) = self.version;
        if major != VERSION_MAJOR || minor > VERSION_MINOR {
            return Err(ArchiveError::UnsupportedVersion {
                major,
                minor,
                bugfix,
            });
        }

        validate_block_size(self.block_size)?;

        if self.used_data_length.checked_add(HEADER_SIZE).is_none() {
            return Err(ArchiveError::MalformedLength(format!(
                "used data length {} does not fit in a file",
                self.used_data_length
            )));
        }
        if self.used_data_length % self.block_size as u64 != 0 {
            return Err(ArchiveError::MalformedLength(format!(
                "used data length {} is not a multiple of block size {}",
                self.used_data_length, self.block_size
            )));
        }

        Ok(())
    }

    /// Offset of a block inside the container file
    pub fn block_offset(&self, block_id: u64) -> u64 {
        block_offset(self.block_size, block_id)
    }

    /// Offset of the descriptor section
    pub fn metadata_offset(&self) -> u64 {
        HEADER_SIZE + self.used_data_length
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE as usize);

        bytes.extend_from_slice(&self.magic);
        bytes.push(self.version.0);
        bytes.push(self.version.1);
        bytes.push(self.version.2);
        bytes.extend_from_slice(&self.block_size.to_be_bytes());
        bytes.extend_from_slice(&self.used_data_length.to_be_bytes());

        bytes
    }

    /// Deserialize and validate a header
    ///
    /// The signature is checked before anything else is looked at, so a
    /// truncated or foreign file fails with `InvalidSignature`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
            return Err(ArchiveError::InvalidSignature);
        }
        if bytes.len() < HEADER_SIZE as usize {
            return Err(ArchiveError::MalformedLength(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[..8]);
        let version = (bytes[8], bytes[9], bytes[10]);

        let mut block_size = [0u8; 4];
        block_size.copy_from_slice(&bytes[11..15]);

        let mut used = [0u8; 8];
        used.copy_from_slice(&bytes[15..23]);

        let header = Header {
            magic,
            version,
            block_size: u32::from_be_bytes(block_size),
            used_data_length: u64::from_be_bytes(used),
        };
        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// Offset of a block inside the container file
pub fn block_offset(block_size: u32, block_id: u64) -> u64 {
    HEADER_SIZE + block_id * block_size as u64
}

/// Block sizes must be powers of two between 256 bytes and 1 MiB
pub fn validate_block_size(block_size: u32) -> Result<()> {
    if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(ArchiveError::InvalidBlockSize(block_size));
    }
    Ok(())
}
