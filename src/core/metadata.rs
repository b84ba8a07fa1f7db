//! Metadata section writer and the crash-recovery write session
//!
//! Every metadata write rewrites the whole tail of the container:
//!
//! 1. encode the inventory through the descriptor (maybe sealed)
//! 2. encode the descriptor as plaintext JSON
//! 3. compute the used data length from the inventory
//! 4. overwrite the used-data-length field in the header
//! 5. write `[len][descriptor][len][inventory]` right after the data region
//! 6. truncate the file to end exactly there and sync
//!
//! Blocks past the last one still owned by a file are cut off in step 6,
//! which is how deleted or shrunk files give space back.

use crate::core::allocator;
use crate::core::context::ArchiveContext;
use crate::core::descriptor::Descriptor;
use crate::core::header::HEADER_SIZE;
use crate::core::inventory::Inventory;
use crate::core::io::ContainerFile;
use crate::core::security::SecurityProvider;
use crate::error::{ArchiveError, Result};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, ThreadId};
use tracing::{debug, error, info, warn};

/// Write the descriptor and inventory sections, truncating unused blocks
///
/// Returns the new used data length.
pub fn write(
    path: &Path,
    inventory: &Inventory,
    descriptor: &Descriptor,
    provider: &dyn SecurityProvider,
    block_size: u32,
) -> Result<u64> {
    debug!("Saving archive metadata to {:?}", path);

    let used_data_length = allocator::used_data_length(inventory, block_size)?;

    let inventory_bytes = descriptor.encode_inventory(inventory, provider, &mut OsRng)?;
    let descriptor_bytes = serde_json::to_vec(descriptor)?;

    let mut section = Vec::with_capacity(8 + descriptor_bytes.len() + inventory_bytes.len());
    section.extend_from_slice(&section_length(&descriptor_bytes, "descriptor")?);
    section.extend_from_slice(&descriptor_bytes);
    section.extend_from_slice(&section_length(&inventory_bytes, "inventory")?);
    section.extend_from_slice(&inventory_bytes);

    let metadata_offset = HEADER_SIZE + used_data_length;
    let mut container = ContainerFile::open(path)?;
    container.write_used_length(used_data_length)?;
    container.write_at(metadata_offset, &section)?;
    container.set_len(metadata_offset + section.len() as u64)?;
    container.sync()?;

    info!(
        "Saved archive metadata ({} data bytes, {} metadata bytes)",
        used_data_length,
        section.len()
    );
    Ok(used_data_length)
}

fn section_length(bytes: &[u8], what: &str) -> Result<[u8; 4]> {
    u32::try_from(bytes.len())
        .map(u32::to_be_bytes)
        .map_err(|_| {
            ArchiveError::MalformedLength(format!("{} section of {} bytes is too large", what, bytes.len()))
        })
}

/// Last committed state of one session, enough to rewrite its metadata
struct RecoverySnapshot {
    path: PathBuf,
    inventory: Inventory,
    descriptor: Descriptor,
    block_size: u32,
    provider: Arc<dyn SecurityProvider>,
    #[cfg_attr(not(panic = "abort"), allow(dead_code))]
    owner: ThreadId,
}

impl RecoverySnapshot {
    fn capture(context: &ArchiveContext, provider: &Arc<dyn SecurityProvider>) -> Self {
        RecoverySnapshot {
            path: context.path().to_path_buf(),
            inventory: context.inventory.clone(),
            descriptor: context.descriptor().clone(),
            block_size: context.block_size(),
            provider: provider.clone(),
            owner: thread::current().id(),
        }
    }

    fn write(&self) -> Result<u64> {
        write(
            &self.path,
            &self.inventory,
            &self.descriptor,
            self.provider.as_ref(),
            self.block_size,
        )
    }
}

static RECOVERY_REGISTRY: Mutex<BTreeMap<u64, RecoverySnapshot>> =
    parking_lot::const_mutex(BTreeMap::new());
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static INSTALL_HOOKS: Once = Once::new();

/// Hook the process exit and panic paths once per process
fn install_recovery_hooks() {
    INSTALL_HOOKS.call_once(|| {
        // SAFETY: the handler is a plain `extern "C" fn` with no arguments
        let status = unsafe { libc::atexit(recover_at_exit) };
        if status != 0 {
            warn!("Could not register exit handler for metadata recovery");
        }

        install_panic_hook();
    });
}

/// Without unwinding no `Drop` runs, so the panicking thread's sessions are
/// written from their snapshots; the other threads' sessions are still live
#[cfg(panic = "abort")]
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let current = thread::current().id();
        run_emergency_writes(|snapshot| snapshot.owner == current);
        previous(info);
    }));
}

/// Unwinding drops the session, which writes the live state
#[cfg(not(panic = "abort"))]
fn install_panic_hook() {}

extern "C" fn recover_at_exit() {
    // unwinding out of an exit handler would abort
    let _ = std::panic::catch_unwind(|| run_emergency_writes(|_| true));
}

/// Write out the selected registered snapshots, once
///
/// Uses `try_lock` so it never waits on a session that is in the middle of
/// registering or committing; a session caught there is skipped.
fn run_emergency_writes<F>(select: F)
where
    F: Fn(&RecoverySnapshot) -> bool,
{
    let snapshots: Vec<(u64, RecoverySnapshot)> = match RECOVERY_REGISTRY.try_lock() {
        Some(mut registry) => {
            let ids: Vec<u64> = registry
                .iter()
                .filter(|(_, snapshot)| select(snapshot))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| registry.remove(&id).map(|snapshot| (id, snapshot)))
                .collect()
        }
        None => {
            warn!("Recovery registry busy, skipping emergency metadata write");
            return;
        }
    };

    for (id, snapshot) in snapshots {
        warn!(
            "Performing emergency metadata write for {:?} (session {})",
            snapshot.path, id
        );
        if let Err(e) = snapshot.write() {
            error!("Emergency metadata write for {:?} failed: {}", snapshot.path, e);
        }
    }
}

/// Scoped metadata-mutating session with crash recovery
///
/// While the session is open, the last committed state of the archive is
/// registered with exit and panic hooks, so an abnormal exit still leaves
/// a metadata section that matches blocks that were committed. Closing the
/// session (or dropping it) writes the live state and deregisters.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vaultpack::core::context::ArchiveContext;
/// use vaultpack::core::metadata::ProtectedMetadataWrite;
/// use vaultpack::core::security::{SecurityProvider, UserSecurityProvider};
///
/// # fn main() -> vaultpack::Result<()> {
/// let provider: Arc<dyn SecurityProvider> = Arc::new(UserSecurityProvider::no_password());
/// let mut context = ArchiveContext::open("data.vpk", provider.as_ref())?;
/// let mut session = ProtectedMetadataWrite::begin(&mut context, provider);
/// session.inventory.create_folder("/new", false)?;
/// session.close()?;
/// # Ok(())
/// # }
/// ```
pub struct ProtectedMetadataWrite<'a> {
    context: &'a mut ArchiveContext,
    provider: Arc<dyn SecurityProvider>,
    id: u64,
    closed: bool,
}

impl<'a> ProtectedMetadataWrite<'a> {
    /// Open a session, registering the current state for recovery
    pub fn begin(context: &'a mut ArchiveContext, provider: Arc<dyn SecurityProvider>) -> Self {
        install_recovery_hooks();

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let snapshot = RecoverySnapshot::capture(context, &provider);
        RECOVERY_REGISTRY.lock().insert(id, snapshot);
        debug!("Opened protected metadata session {} for {:?}", id, context.path());

        ProtectedMetadataWrite {
            context,
            provider,
            id,
            closed: false,
        }
    }

    /// Identifier of this session in the recovery registry
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a recovery snapshot is currently registered for this session
    pub fn is_registered(&self) -> bool {
        RECOVERY_REGISTRY.lock().contains_key(&self.id)
    }

    /// Persist the current state and make it the recovery snapshot
    pub fn commit(&mut self) -> Result<()> {
        self.context.save(self.provider.as_ref())?;
        let snapshot = RecoverySnapshot::capture(self.context, &self.provider);
        RECOVERY_REGISTRY.lock().insert(self.id, snapshot);
        Ok(())
    }

    /// Write the final state and deregister
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // deregister even when the final write fails; the error goes to the caller
        let result = self.context.save(self.provider.as_ref());
        RECOVERY_REGISTRY.lock().remove(&self.id);
        debug!("Closed protected metadata session {}", self.id);
        result.map(|_| ())
    }

    /// Run the emergency write for this session only
    #[cfg(test)]
    fn emergency_write(&self) -> Result<u64> {
        let registry = RECOVERY_REGISTRY.lock();
        match registry.get(&self.id) {
            Some(snapshot) => snapshot.write(),
            None => Err(ArchiveError::NotFound {
                path: format!("recovery session {}", self.id),
            }),
        }
    }
}

impl Deref for ProtectedMetadataWrite<'_> {
    type Target = ArchiveContext;

    fn deref(&self) -> &ArchiveContext {
        self.context
    }
}

impl DerefMut for ProtectedMetadataWrite<'_> {
    fn deref_mut(&mut self) -> &mut ArchiveContext {
        self.context
    }
}

impl Drop for ProtectedMetadataWrite<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("Final metadata write for session {} failed: {}", self.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::UserSecurityProvider;
    use tempfile::TempDir;

    fn provider() -> Arc<dyn SecurityProvider> {
        Arc::new(UserSecurityProvider::no_password())
    }

    fn new_context(dir: &TempDir) -> ArchiveContext {
        let path = dir.path().join("session.vpk");
        ArchiveContext::create(&path, Descriptor::Plaintext, 1024, provider().as_ref()).unwrap()
    }

    #[test]
    fn test_write_lays_out_sections() {
        let dir = TempDir::new().unwrap();
        let context = new_context(&dir);

        let bytes = std::fs::read(context.path()).unwrap();
        let descriptor_json = br#"{"identifier":"plaintext"}"#;
        let at = HEADER_SIZE as usize;
        assert_eq!(&bytes[at..at + 4], &(descriptor_json.len() as u32).to_be_bytes());
        assert_eq!(&bytes[at + 4..at + 4 + descriptor_json.len()], descriptor_json);

        let inventory_at = at + 4 + descriptor_json.len();
        let inventory_length =
            u32::from_be_bytes(bytes[inventory_at..inventory_at + 4].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), inventory_at + 4 + inventory_length);
    }

    #[test]
    fn test_session_close_writes_and_deregisters() {
        let dir = TempDir::new().unwrap();
        let mut context = new_context(&dir);
        let path = context.path().to_path_buf();

        let mut session = ProtectedMetadataWrite::begin(&mut context, provider());
        assert!(session.is_registered());
        session.inventory.create_folder("/kept", false).unwrap();
        let id = session.id();
        session.close().unwrap();

        assert!(!RECOVERY_REGISTRY.lock().contains_key(&id));
        let reopened = ArchiveContext::open(&path, provider().as_ref()).unwrap();
        assert!(reopened.inventory.folder("/kept").is_ok());
    }

    #[test]
    fn test_drop_finalizes() {
        let dir = TempDir::new().unwrap();
        let mut context = new_context(&dir);
        let path = context.path().to_path_buf();

        {
            let mut session = ProtectedMetadataWrite::begin(&mut context, provider());
            session.inventory.create_folder("/dropped", false).unwrap();
        }

        let reopened = ArchiveContext::open(&path, provider().as_ref()).unwrap();
        assert!(reopened.inventory.folder("/dropped").is_ok());
    }

    #[test]
    fn test_emergency_write_uses_committed_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut context = new_context(&dir);
        let path = context.path().to_path_buf();

        let mut session = ProtectedMetadataWrite::begin(&mut context, provider());
        session.inventory.create_folder("/committed", false).unwrap();
        session.commit().unwrap();
        session.inventory.create_folder("/pending", false).unwrap();

        session.emergency_write().unwrap();
        let recovered = ArchiveContext::open(&path, provider().as_ref()).unwrap();
        assert!(recovered.inventory.folder("/committed").is_ok());
        assert!(!recovered.inventory.exists("/pending"));

        session.close().unwrap();
        let closed = ArchiveContext::open(&path, provider().as_ref()).unwrap();
        assert!(closed.inventory.folder("/pending").is_ok());
    }
}
