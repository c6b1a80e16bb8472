//! The block cipher capability searched against.
//!
//! The search only ever needs `{encrypt, decrypt}` over whole buffers.
//! [`CipherKind`] selects a concrete implementation from configuration.

use crate::KeyBlob;
use crate::codec::with_odd_parity;
use des::Des;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use std::sync::Arc;

/// DES block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// The cipher declined a specific key.
///
/// This is never fatal: the pipeline treats the key as a non-match and moves
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Key rejected by cipher")]
pub struct WeakKeyRejected;

/// A pure, thread-safe block cipher.
///
/// Implementations must return identical output for identical input and hold
/// no mutable state, since every pipeline stage calls them concurrently.
pub trait Cipher: Send + Sync {
    /// Encrypts `plaintext` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WeakKeyRejected`] if the cipher refuses `key`.
    fn encrypt(&self, key: &KeyBlob, plaintext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected>;

    /// Decrypts `ciphertext` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WeakKeyRejected`] if the cipher refuses `key`.
    fn decrypt(&self, key: &KeyBlob, ciphertext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected>;

    /// Required buffer alignment in bytes. Buffers handed to this cipher must
    /// be a multiple of it.
    fn block_size(&self) -> usize {
        1
    }
}

/// Selects a [`Cipher`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherKind {
    /// Single DES in ECB mode.
    #[default]
    Des,
    /// Repeating-key XOR. Useful for demos and tests where decrypt should be
    /// cheap.
    Xor,
}

impl CipherKind {
    pub fn build(self) -> Arc<dyn Cipher> {
        match self {
            Self::Des => Arc::new(DesEcb),
            Self::Xor => Arc::new(XorCipher),
        }
    }
}

/// Single DES, ECB mode, over buffers that are a multiple of 8 bytes.
///
/// Odd parity is forced onto the key before use, then weak and semi-weak keys
/// are refused. Any trailing bytes short of a full block are passed through
/// unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesEcb;

/// The 4 weak and 12 semi-weak DES keys, with odd parity applied.
const WEAK_KEYS: [KeyBlob; 16] = [
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE],
    [0x1F, 0x1F, 0x1F, 0x1F, 0x0E, 0x0E, 0x0E, 0x0E],
    [0xE0, 0xE0, 0xE0, 0xE0, 0xF1, 0xF1, 0xF1, 0xF1],
    [0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE],
    [0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01],
    [0x1F, 0xE0, 0x1F, 0xE0, 0x0E, 0xF1, 0x0E, 0xF1],
    [0xE0, 0x1F, 0xE0, 0x1F, 0xF1, 0x0E, 0xF1, 0x0E],
    [0x01, 0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1],
    [0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1, 0x01],
    [0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E, 0xFE],
    [0xFE, 0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E],
    [0x01, 0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E],
    [0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E, 0x01],
    [0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1, 0xFE],
    [0xFE, 0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1],
];

impl DesEcb {
    fn schedule(key: &KeyBlob) -> Result<Des, WeakKeyRejected> {
        let key = key.map(with_odd_parity);
        if WEAK_KEYS.contains(&key) {
            return Err(WeakKeyRejected);
        }
        Ok(Des::new(GenericArray::from_slice(&key)))
    }
}

impl Cipher for DesEcb {
    fn encrypt(&self, key: &KeyBlob, plaintext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected> {
        let des = Self::schedule(key)?;
        let mut out = plaintext.to_vec();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            des.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn decrypt(&self, key: &KeyBlob, ciphertext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected> {
        let des = Self::schedule(key)?;
        let mut out = ciphertext.to_vec();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            des.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
}

/// Repeating-key XOR with the 8-byte key blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorCipher;

impl XorCipher {
    fn apply(key: &KeyBlob, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .zip(key.iter().cycle())
            .map(|(byte, k)| byte ^ k)
            .collect()
    }
}

impl Cipher for XorCipher {
    fn encrypt(&self, key: &KeyBlob, plaintext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected> {
        Ok(Self::apply(key, plaintext))
    }

    fn decrypt(&self, key: &KeyBlob, ciphertext: &[u8]) -> Result<Vec<u8>, WeakKeyRejected> {
        Ok(Self::apply(key, ciphertext))
    }
}
