//! Symmetric ciphers for file content and sealed inventories
//!
//! All algorithms run in CTR mode so ciphertext is exactly as long as the
//! plaintext. A stored block is therefore the same size whether or not the
//! file is encrypted, and the keystream can be applied to arbitrary slices
//! as data streams through.
//!
//! **Parameters**: `[key][iv: 16 bytes]`, freshly drawn from the injected
//! random source on every write and kept in the file's inventory entry.

use crate::error::{ArchiveError, Result};
use aes::{Aes128, Aes256};
use ctr::cipher::{InnerIvInit, KeyInit, StreamCipher};
use ctr::{Ctr128BE, CtrCore};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use twofish::Twofish;

/// IV size for every CTR algorithm (one 128-bit cipher block)
pub const IV_SIZE: usize = 16;

/// Encryption algorithm tag for a file or a sealed inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encryption {
    /// Stored as-is
    #[default]
    None,
    Aes128Ctr,
    Aes256Ctr,
    Twofish128Ctr,
    Twofish256Ctr,
}

impl Encryption {
    /// Key length in bytes (0 for `None`)
    pub fn key_size(&self) -> usize {
        match self {
            Encryption::None => 0,
            Encryption::Aes128Ctr | Encryption::Twofish128Ctr => 16,
            Encryption::Aes256Ctr | Encryption::Twofish256Ctr => 32,
        }
    }

    /// Length of the stored `[key][iv]` parameter blob
    pub fn parameters_size(&self) -> usize {
        match self {
            Encryption::None => 0,
            _ => self.key_size() + IV_SIZE,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Encryption::None)
    }

    /// Draw a fresh key and IV for one write
    pub fn generate_parameters(&self, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
        if self.is_none() {
            return None;
        }
        let mut params = vec![0u8; self.parameters_size()];
        rng.fill_bytes(&mut params);
        Some(params)
    }
}

/// A running CTR keystream
pub enum Keystream {
    Aes128(Ctr128BE<Aes128>),
    Aes256(Ctr128BE<Aes256>),
    Twofish(Ctr128BE<Twofish>),
}

impl Keystream {
    /// Start a keystream from an explicit key and IV
    pub fn new(algorithm: Encryption, key: &[u8], iv: &[u8]) -> Result<Option<Self>> {
        if key.len() != algorithm.key_size() || (!algorithm.is_none() && iv.len() != IV_SIZE) {
            return Err(ArchiveError::Security(format!(
                "invalid key or IV length for {:?}",
                algorithm
            )));
        }
        let bad_length = |_| ArchiveError::Security(format!("invalid key length for {:?}", algorithm));

        let stream = match algorithm {
            Encryption::None => return Ok(None),
            Encryption::Aes128Ctr => Keystream::Aes128(
                Ctr128BE::from_core(
                    CtrCore::inner_iv_slice_init(Aes128::new_from_slice(key).map_err(bad_length)?, iv)
                        .map_err(bad_length)?,
                ),
            ),
            Encryption::Aes256Ctr => Keystream::Aes256(
                Ctr128BE::from_core(
                    CtrCore::inner_iv_slice_init(Aes256::new_from_slice(key).map_err(bad_length)?, iv)
                        .map_err(bad_length)?,
                ),
            ),
            Encryption::Twofish128Ctr | Encryption::Twofish256Ctr => Keystream::Twofish(
                Ctr128BE::from_core(
                    CtrCore::inner_iv_slice_init(Twofish::new_from_slice(key).map_err(bad_length)?, iv)
                        .map_err(bad_length)?,
                ),
            ),
        };
        Ok(Some(stream))
    }

    /// Start a keystream from a stored `[key][iv]` parameter blob
    pub fn from_parameters(algorithm: Encryption, params: Option<&[u8]>) -> Result<Option<Self>> {
        if algorithm.is_none() {
            return Ok(None);
        }
        let params = params.ok_or_else(|| {
            ArchiveError::Security(format!("missing encryption parameters for {:?}", algorithm))
        })?;
        if params.len() != algorithm.parameters_size() {
            return Err(ArchiveError::Security(format!(
                "expected {} bytes of encryption parameters, got {}",
                algorithm.parameters_size(),
                params.len()
            )));
        }
        let (key, iv) = params.split_at(algorithm.key_size());
        Keystream::new(algorithm, key, iv)
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
            Keystream::Twofish(c) => c.apply_keystream(buf),
        }
    }
}

/// One-shot encryption or decryption of a whole buffer (CTR is symmetric)
pub fn apply(algorithm: Encryption, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut out = data.to_vec();
    if let Some(mut stream) = Keystream::new(algorithm, key, iv)? {
        stream.apply(&mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn split_parameters(algorithm: Encryption, params: &[u8]) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let (key, iv) = params.split_at(algorithm.key_size());
        (Zeroizing::new(key.to_vec()), iv.to_vec())
    }

    const ALL: [Encryption; 4] = [
        Encryption::Aes128Ctr,
        Encryption::Aes256Ctr,
        Encryption::Twofish128Ctr,
        Encryption::Twofish256Ctr,
    ];

    #[test]
    fn test_none_is_passthrough() {
        let data = b"plain".to_vec();
        assert_eq!(apply(Encryption::None, &[], &[], &data).unwrap(), data);
        assert!(Encryption::None
            .generate_parameters(&mut StdRng::seed_from_u64(1))
            .is_none());
    }

    #[test]
    fn test_ctr_round_trip_and_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        for algorithm in ALL {
            let params = algorithm.generate_parameters(&mut rng).unwrap();
            let (key, iv) = split_parameters(algorithm, &params);

            let sealed = apply(algorithm, &key, &iv, &data).unwrap();
            assert_eq!(sealed.len(), data.len());
            assert_ne!(sealed, data);
            assert_eq!(apply(algorithm, &key, &iv, &sealed).unwrap(), data);
        }
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = Encryption::Aes256Ctr.generate_parameters(&mut rng).unwrap();
        let data = vec![0x5au8; 777];

        let mut streamed = data.clone();
        let mut stream = Keystream::from_parameters(Encryption::Aes256Ctr, Some(&params))
            .unwrap()
            .unwrap();
        let (a, b) = streamed.split_at_mut(100);
        stream.apply(a);
        stream.apply(b);

        let (key, iv) = split_parameters(Encryption::Aes256Ctr, &params);
        assert_eq!(streamed, apply(Encryption::Aes256Ctr, &key, &iv, &data).unwrap());
    }

    #[test]
    fn test_aes128_ctr_known_answer() {
        // NIST SP 800-38A, F.5.1 (first two blocks)
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let iv = [
            0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd,
            0xfe, 0xff,
        ];
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a, 0xae, 0x2d, 0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c, 0x9e, 0xb7, 0x6f, 0xac,
            0x45, 0xaf, 0x8e, 0x51,
        ];
        let expected = [
            0x87, 0x4d, 0x61, 0x91, 0xb6, 0x20, 0xe3, 0x26, 0x1b, 0xef, 0x68, 0x64, 0x99, 0x0d,
            0xb6, 0xce, 0x98, 0x06, 0xf8, 0x66, 0x77, 0x5b, 0x7d, 0x8f, 0x4e, 0x16, 0xac, 0x10,
            0xca, 0xc9, 0x1d, 0xdc,
        ];

        assert_eq!(apply(Encryption::Aes128Ctr, &key, &iv, &plaintext).unwrap(), expected);
    }

    #[test]
    fn test_twofish_accepts_both_key_sizes() {
        let data = [0u8; 48];
        let iv = [0u8; IV_SIZE];
        let short = apply(Encryption::Twofish128Ctr, &[1u8; 16], &iv, &data).unwrap();
        let long = apply(Encryption::Twofish256Ctr, &[1u8; 32], &iv, &data).unwrap();
        assert_ne!(short, data);
        assert_ne!(long, data);
        assert_ne!(short, long);
    }

    #[test]
    fn test_bad_parameters() {
        assert!(Keystream::from_parameters(Encryption::Aes128Ctr, None).is_err());
        assert!(Keystream::from_parameters(Encryption::Aes128Ctr, Some(&[0u8; 5])).is_err());
        assert!(Keystream::new(Encryption::Aes256Ctr, &[0u8; 16], &[0u8; 16]).is_err());
    }
}
