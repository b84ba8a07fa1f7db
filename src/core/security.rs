//! Password handling and the cipher capability used by the core
//!
//! The core never asks for a password directly. It goes through a
//! [`SecurityProvider`], which the embedding application backs with
//! whatever prompt, keyring or password file it has.

use crate::core::cipher::{self, Encryption};
use crate::core::descriptor::Descriptor;
use crate::error::{ArchiveError, Result};
use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

/// Source of the archive password
pub trait PasswordProvider: Send + Sync {
    fn password(&self) -> Result<Zeroizing<Vec<u8>>>;
}

impl<F> PasswordProvider for F
where
    F: Fn() -> Result<Zeroizing<Vec<u8>>> + Send + Sync,
{
    fn password(&self) -> Result<Zeroizing<Vec<u8>>> {
        self()
    }
}

/// A password known up front
pub struct StaticPassword(Zeroizing<Vec<u8>>);

impl StaticPassword {
    pub fn new(password: impl AsRef<[u8]>) -> Self {
        StaticPassword(Zeroizing::new(password.as_ref().to_vec()))
    }
}

impl PasswordProvider for StaticPassword {
    fn password(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(self.0.clone())
    }
}

/// No password available (plaintext archives only)
pub struct NoPassword;

impl PasswordProvider for NoPassword {
    fn password(&self) -> Result<Zeroizing<Vec<u8>>> {
        Err(ArchiveError::PasswordUnavailable(
            "no password provider configured".to_string(),
        ))
    }
}

/// Key derivation and symmetric encryption, as seen by the core
///
/// Only `password` is required. The other methods default to the built-in
/// KDFs and CTR ciphers.
pub trait SecurityProvider: Send + Sync {
    fn password(&self) -> Result<Zeroizing<Vec<u8>>>;

    /// Derive `length` bytes of key material for a descriptor
    fn derive_key(&self, descriptor: &Descriptor, length: usize) -> Result<Zeroizing<Vec<u8>>> {
        let password = self.password()?;
        descriptor.derive_key(&password, length)
    }

    fn encrypt(&self, data: &[u8], algorithm: Encryption, key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        cipher::apply(algorithm, key, iv, data)
    }

    fn decrypt(&self, data: &[u8], algorithm: Encryption, key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        cipher::apply(algorithm, key, iv, data)
    }
}

/// Derived key kept for the descriptor it was derived for
struct CachedKey {
    descriptor: Descriptor,
    length: usize,
    key: Zeroizing<Vec<u8>>,
}

/// Default provider: a password source plus a one-entry key cache
///
/// Every metadata write of a password archive needs the derived key, and
/// the KDFs are deliberately slow, so the last derivation is remembered
/// until [`clear_cache`](Self::clear_cache) is called or a different
/// descriptor is used.
pub struct UserSecurityProvider {
    passwords: Box<dyn PasswordProvider>,
    cache: Mutex<Option<CachedKey>>,
}

impl UserSecurityProvider {
    pub fn new(passwords: Box<dyn PasswordProvider>) -> Self {
        UserSecurityProvider {
            passwords,
            cache: Mutex::new(None),
        }
    }

    pub fn with_password(password: impl AsRef<[u8]>) -> Self {
        Self::new(Box::new(StaticPassword::new(password)))
    }

    /// Provider for plaintext archives; any password request fails
    pub fn no_password() -> Self {
        Self::new(Box::new(NoPassword))
    }

    /// Forget the cached key
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }
}

impl SecurityProvider for UserSecurityProvider {
    fn password(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.passwords.password()
    }

    fn derive_key(&self, descriptor: &Descriptor, length: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.length == length && &cached.descriptor == descriptor {
                return Ok(cached.key.clone());
            }
        }

        debug!("Deriving {} key bytes with {}", length, descriptor.identifier());
        let password = self.password()?;
        let key = descriptor.derive_key(&password, length)?;
        *cache = Some(CachedKey {
            descriptor: descriptor.clone(),
            length,
            key: key.clone(),
        });
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_no_password() {
        let provider = UserSecurityProvider::no_password();
        assert!(matches!(
            provider.password(),
            Err(ArchiveError::PasswordUnavailable(_))
        ));
    }

    #[test]
    fn test_closure_provider_and_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = UserSecurityProvider::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ArchiveError>(Zeroizing::new(b"secret".to_vec()))
        }));

        let mut rng = StdRng::seed_from_u64(5);
        let descriptor = Descriptor::pbkdf2(4096, Encryption::Aes128Ctr, &mut rng).unwrap();

        let first = provider.derive_key(&descriptor, 48).unwrap();
        let second = provider.derive_key(&descriptor, 48).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        provider.clear_cache();
        provider.derive_key(&descriptor, 48).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_different_salts_give_different_keys() {
        let provider = UserSecurityProvider::with_password("pw");
        let mut rng = StdRng::seed_from_u64(9);
        let a = Descriptor::pbkdf2(4096, Encryption::Aes128Ctr, &mut rng).unwrap();
        let b = Descriptor::pbkdf2(4096, Encryption::Aes128Ctr, &mut rng).unwrap();

        assert_ne!(
            provider.derive_key(&a, 48).unwrap(),
            provider.derive_key(&b, 48).unwrap()
        );
    }

    #[test]
    fn test_default_encrypt_decrypt() {
        let provider = UserSecurityProvider::no_password();
        let key = [7u8; 32];
        let iv = [1u8; 16];
        let sealed = provider
            .encrypt(b"inventory", Encryption::Twofish256Ctr, &key, &iv)
            .unwrap();
        assert_eq!(
            provider
                .decrypt(&sealed, Encryption::Twofish256Ctr, &key, &iv)
                .unwrap(),
            b"inventory"
        );
    }
}
