use crate::{CipherKind, Codec, Error, KeyId, Range, Result};
use bytes::Bytes;

/// The immutable input of a search run.
///
/// Built once by the coordinating process and shipped read-only to every
/// worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    cipher: CipherKind,
    codec: Codec,
    ciphertext: Bytes,
    phrase: Bytes,
    key_space: KeyId,
}

impl Job {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the ciphertext is empty or not
    /// block aligned, the phrase is empty, the key space is empty, or the key
    /// space exceeds the codec's domain.
    pub fn new(
        cipher: CipherKind,
        codec: Codec,
        ciphertext: Bytes,
        phrase: Bytes,
        key_space: KeyId,
    ) -> Result<Self> {
        let block = cipher.build().block_size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(Error::invalid(format!(
                "ciphertext of {} bytes is not a positive multiple of {block}",
                ciphertext.len()
            )));
        }
        if phrase.is_empty() {
            return Err(Error::invalid("search phrase must not be empty"));
        }
        if key_space == 0 {
            return Err(Error::invalid("key space must not be empty"));
        }
        match codec.domain_bound() {
            Some(bound) if key_space > bound => {
                return Err(Error::invalid(format!(
                    "key space {key_space} exceeds the {codec:?} domain of {bound} keys"
                )));
            }
            _ => {}
        }
        Ok(Self {
            cipher,
            codec,
            ciphertext,
            phrase,
            key_space,
        })
    }

    /// Encrypts `plaintext` under `secret` to produce a searchable job.
    ///
    /// The plaintext is zero padded to the cipher's block size first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoaderFailure`] if the plaintext is empty, if the
    /// secret lies outside the codec's domain (it would be truncated) or if
    /// the cipher rejects it. Returns [`Error::InvalidArgument`] for the
    /// conditions listed on [`Job::new`].
    pub fn from_plaintext(
        cipher: CipherKind,
        codec: Codec,
        plaintext: &[u8],
        secret: KeyId,
        phrase: impl Into<Bytes>,
        key_space: KeyId,
    ) -> Result<Self> {
        if plaintext.is_empty() {
            return Err(Error::LoaderFailure {
                reason: "plaintext is empty".to_string(),
            });
        }
        if let Some(bound) = codec.domain_bound() {
            if secret >= bound {
                return Err(Error::LoaderFailure {
                    reason: format!(
                        "encryption key {secret} is outside the {codec:?} domain [0, {bound})"
                    ),
                });
            }
        }
        let imp = cipher.build();
        let block = imp.block_size();
        let mut padded = plaintext.to_vec();
        padded.resize(plaintext.len().div_ceil(block) * block, 0);

        let ciphertext = imp
            .encrypt(&codec.encode(secret), &padded)
            .map_err(|_| Error::LoaderFailure {
                reason: format!("encryption key {secret} rejected by {cipher:?}"),
            })?;

        Self::new(cipher, codec, ciphertext.into(), phrase.into(), key_space)
    }

    pub const fn cipher(&self) -> CipherKind {
        self.cipher
    }

    pub const fn codec(&self) -> Codec {
        self.codec
    }

    pub const fn ciphertext(&self) -> &Bytes {
        &self.ciphertext
    }

    pub const fn phrase(&self) -> &Bytes {
        &self.phrase
    }

    /// Exclusive upper bound of the searched key ids.
    pub const fn key_space(&self) -> KeyId {
        self.key_space
    }

    /// The whole key space as a range.
    pub fn full_range(&self) -> Range {
        Range::new(0, self.key_space).unwrap_or_else(|_| Range::empty())
    }
}

/// Key space size for a number of key bits, capped so the result stays a
/// valid exclusive bound.
pub const fn key_space_for_bits(bits: u32) -> KeyId {
    if bits >= 64 { u64::MAX } else { 1 << bits }
}
