//! Storage engine
//!
//! - [`allocator`] - Interval sets and block allocation
//! - [`header`] - Fixed header (signature, version, block size, used length)
//! - [`io`] - Positioned reads and writes on the container file
//! - [`descriptor`] - Inventory protection scheme (plaintext, PBKDF2, scrypt)
//! - [`security`] - Password sources and the key derivation capability
//! - [`cipher`] - CTR stream ciphers for content and inventory
//! - [`compression`] - LZ4 and Zstd content compression
//! - [`inventory`] - Folder/file tree and path traversal
//! - [`metadata`] - Metadata writer and crash-recovery sessions
//! - [`context`] - An opened archive
//! - [`stream`] - Layered read/write streams for file content

pub mod allocator;
pub mod cipher;
pub mod compression;
pub mod context;
pub mod descriptor;
pub mod header;
pub mod inventory;
pub mod io;
pub mod metadata;
pub mod security;
pub mod stream;
