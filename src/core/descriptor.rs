//! Container descriptor: how the inventory section is protected
//!
//! The descriptor is always stored as plaintext JSON right after the data
//! region, so a reader can learn how to open the inventory before it has
//! any key material.
//!
//! Password descriptors derive `key_size + 32` bytes from the password.
//! The first `key_size` bytes key the cipher, the last 32 key an
//! HMAC-SHA256 over the sealed bytes:
//!
//! ```text
//! [iv: 16][ciphertext: n][tag: 32]
//! ```
//!
//! A bad tag is reported as `AuthenticationFailed`, which is what a wrong
//! password looks like.

use crate::core::cipher::{Encryption, IV_SIZE};
use crate::core::inventory::{b64, Inventory};
use crate::core::security::SecurityProvider;
use crate::error::{ArchiveError, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

pub const MAC_KEY_SIZE: usize = 32;
pub const TAG_SIZE: usize = 32;
pub const SALT_SIZE: usize = 32;

pub const MIN_PBKDF2_ITERATIONS: u32 = 4096;
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

pub const DEFAULT_SCRYPT_LOG_N: u8 = 15;
pub const DEFAULT_SCRYPT_R: u32 = 8;
pub const DEFAULT_SCRYPT_P: u32 = 1;

// The descriptor is read before the inventory tag can be checked, so cost
// parameters from disk are bounded above as well as below.
pub const MIN_SCRYPT_LOG_N: u8 = 4;
pub const MAX_SCRYPT_LOG_N: u8 = 20;
pub const MAX_SCRYPT_R: u32 = 32;
pub const MAX_SCRYPT_P: u32 = 16;

/// Protection scheme for the inventory section
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "identifier", rename_all = "snake_case")]
pub enum Descriptor {
    /// Inventory stored as plain JSON
    #[default]
    Plaintext,

    /// Key derived with PBKDF2-HMAC-SHA256
    #[serde(rename = "pbkdf2")]
    PasswordPbkdf2 {
        iterations: u32,
        #[serde(with = "b64::bytes")]
        salt: Vec<u8>,
        algorithm: Encryption,
    },

    /// Key derived with scrypt (N = 2^log_n)
    #[serde(rename = "scrypt")]
    PasswordScrypt {
        log_n: u8,
        r: u32,
        p: u32,
        #[serde(with = "b64::bytes")]
        salt: Vec<u8>,
        algorithm: Encryption,
    },
}

impl Descriptor {
    /// PBKDF2 descriptor with a fresh salt
    pub fn pbkdf2(iterations: u32, algorithm: Encryption, rng: &mut dyn RngCore) -> Result<Self> {
        let descriptor = Descriptor::PasswordPbkdf2 {
            iterations,
            salt: fresh_salt(rng),
            algorithm,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Scrypt descriptor with a fresh salt
    pub fn scrypt(log_n: u8, r: u32, p: u32, algorithm: Encryption, rng: &mut dyn RngCore) -> Result<Self> {
        let descriptor = Descriptor::PasswordScrypt {
            log_n,
            r,
            p,
            salt: fresh_salt(rng),
            algorithm,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Short name stored in the JSON `identifier` field
    pub fn identifier(&self) -> &'static str {
        match self {
            Descriptor::Plaintext => "plaintext",
            Descriptor::PasswordPbkdf2 { .. } => "pbkdf2",
            Descriptor::PasswordScrypt { .. } => "scrypt",
        }
    }

    /// Cipher sealing the inventory (`None` for plaintext)
    pub fn algorithm(&self) -> Encryption {
        match self {
            Descriptor::Plaintext => Encryption::None,
            Descriptor::PasswordPbkdf2 { algorithm, .. }
            | Descriptor::PasswordScrypt { algorithm, .. } => *algorithm,
        }
    }

    pub fn requires_password(&self) -> bool {
        !matches!(self, Descriptor::Plaintext)
    }

    /// Check the cost parameters of a password descriptor
    pub fn validate(&self) -> Result<()> {
        match self {
            Descriptor::Plaintext => Ok(()),
            Descriptor::PasswordPbkdf2 {
                iterations,
                salt,
                algorithm,
            } => {
                if !(MIN_PBKDF2_ITERATIONS..=MAX_PBKDF2_ITERATIONS).contains(iterations) {
                    return Err(ArchiveError::Security(format!(
                        "PBKDF2 iterations must be in {}..={}, got {}",
                        MIN_PBKDF2_ITERATIONS, MAX_PBKDF2_ITERATIONS, iterations
                    )));
                }
                check_salt_and_algorithm(salt, *algorithm)
            }
            Descriptor::PasswordScrypt {
                log_n,
                r,
                p,
                salt,
                algorithm,
            } => {
                if !(MIN_SCRYPT_LOG_N..=MAX_SCRYPT_LOG_N).contains(log_n) {
                    return Err(ArchiveError::Security(format!(
                        "scrypt log_n must be in {}..={}, got {}",
                        MIN_SCRYPT_LOG_N, MAX_SCRYPT_LOG_N, log_n
                    )));
                }
                if !(1..=MAX_SCRYPT_R).contains(r) || !(1..=MAX_SCRYPT_P).contains(p) {
                    return Err(ArchiveError::Security(format!(
                        "scrypt r must be in 1..={} and p in 1..={}, got r={} p={}",
                        MAX_SCRYPT_R, MAX_SCRYPT_P, r, p
                    )));
                }
                scrypt::Params::new(*log_n, *r, *p, SALT_SIZE).map_err(|e| {
                    ArchiveError::Security(format!("invalid scrypt parameters: {}", e))
                })?;
                check_salt_and_algorithm(salt, *algorithm)
            }
        }
    }

    /// Derive `length` bytes of key material from a password
    pub fn derive_key(&self, password: &[u8], length: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut key = Zeroizing::new(vec![0u8; length]);
        match self {
            Descriptor::Plaintext => {
                return Err(ArchiveError::Security(
                    "plaintext descriptors have no key".to_string(),
                ))
            }
            Descriptor::PasswordPbkdf2 {
                iterations, salt, ..
            } => {
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, *iterations, &mut key);
            }
            Descriptor::PasswordScrypt {
                log_n, r, p, salt, ..
            } => {
                let params = scrypt::Params::new(*log_n, *r, *p, length).map_err(|e| {
                    ArchiveError::Security(format!("invalid scrypt parameters: {}", e))
                })?;
                scrypt::scrypt(password, salt, &params, &mut key)
                    .map_err(|e| ArchiveError::Security(format!("scrypt failed: {}", e)))?;
            }
        }
        Ok(key)
    }

    /// Serialize the inventory and seal it if this descriptor asks for it
    pub fn encode_inventory(
        &self,
        inventory: &Inventory,
        provider: &dyn SecurityProvider,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<u8>> {
        let json = Zeroizing::new(serde_json::to_vec(inventory)?);
        if !self.requires_password() {
            return Ok(json.to_vec());
        }

        let algorithm = self.algorithm();
        let material = provider.derive_key(self, algorithm.key_size() + MAC_KEY_SIZE)?;
        let (key, mac_key) = material.split_at(algorithm.key_size());

        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);

        let ciphertext = provider.encrypt(&json, algorithm, key, &iv)?;

        let mut sealed = Vec::with_capacity(IV_SIZE + ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ciphertext);
        let tag = compute_tag(mac_key, &sealed)?;
        sealed.extend_from_slice(&tag);

        debug!(
            "Sealed inventory with {:?} ({} bytes)",
            algorithm,
            sealed.len()
        );
        Ok(sealed)
    }

    /// Open (if sealed) and deserialize the inventory section
    pub fn decode_inventory(&self, bytes: &[u8], provider: &dyn SecurityProvider) -> Result<Inventory> {
        if !self.requires_password() {
            return Ok(serde_json::from_slice(bytes)?);
        }

        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(ArchiveError::MalformedLength(format!(
                "sealed inventory is only {} bytes",
                bytes.len()
            )));
        }

        let algorithm = self.algorithm();
        let material = provider.derive_key(self, algorithm.key_size() + MAC_KEY_SIZE)?;
        let (key, mac_key) = material.split_at(algorithm.key_size());

        let (body, tag) = bytes.split_at(bytes.len() - TAG_SIZE);
        let mut mac = new_mac(mac_key)?;
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| ArchiveError::AuthenticationFailed)?;

        let (iv, ciphertext) = body.split_at(IV_SIZE);
        let json = Zeroizing::new(provider.decrypt(ciphertext, algorithm, key, iv)?);
        Ok(serde_json::from_slice(&json)?)
    }
}

fn fresh_salt(rng: &mut dyn RngCore) -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    rng.fill_bytes(&mut salt);
    salt
}

fn check_salt_and_algorithm(salt: &[u8], algorithm: Encryption) -> Result<()> {
    if salt.is_empty() {
        return Err(ArchiveError::Security("salt must not be empty".to_string()));
    }
    if algorithm.is_none() {
        return Err(ArchiveError::Security(
            "password descriptors need an encryption algorithm".to_string(),
        ));
    }
    Ok(())
}

fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key)
        .map_err(|e| ArchiveError::Security(format!("invalid MAC key: {}", e)))
}

fn compute_tag(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
