use crate::{Cipher, Codec, ContainsPhrase, Job, KeyId, Predicate, Result};
use bytes::Bytes;
use std::sync::Arc;

/// A key together with its decryption attempt.
///
/// `plaintext` is `None` when the cipher rejected the key; such a candidate
/// never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: KeyId,
    pub plaintext: Option<Vec<u8>>,
}

/// Everything needed to test one key: codec, cipher, ciphertext and
/// predicate.
///
/// Shared read-only by every pipeline stage.
#[derive(Clone)]
pub struct Probe {
    codec: Codec,
    cipher: Arc<dyn Cipher>,
    ciphertext: Bytes,
    predicate: Arc<dyn Predicate>,
}

impl Probe {
    pub fn new(
        codec: Codec,
        cipher: Arc<dyn Cipher>,
        ciphertext: Bytes,
        predicate: Arc<dyn Predicate>,
    ) -> Self {
        Self {
            codec,
            cipher,
            ciphertext,
            predicate,
        }
    }

    /// Builds the probe for a [`Job`], searching for its phrase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// the job's phrase is empty.
    pub fn from_job(job: &Job) -> Result<Self> {
        let predicate = ContainsPhrase::new(job.phrase().to_vec())?;
        Ok(Self::new(
            job.codec(),
            job.cipher().build(),
            job.ciphertext().clone(),
            Arc::new(predicate),
        ))
    }

    /// Transform stage: encode the key and decrypt the ciphertext with it.
    pub fn transform(&self, key: KeyId) -> Candidate {
        let plaintext = self
            .cipher
            .decrypt(&self.codec.encode(key), &self.ciphertext)
            .ok();
        Candidate { key, plaintext }
    }

    /// Verify stage: evaluate the predicate on a candidate.
    pub fn verify(&self, candidate: &Candidate) -> bool {
        candidate
            .plaintext
            .as_deref()
            .is_some_and(|text| self.predicate.matches(text))
    }

    /// The search predicate over key ids: transform then verify.
    pub fn test(&self, key: KeyId) -> bool {
        self.verify(&self.transform(key))
    }

    /// Decrypts the ciphertext under `key`, for reporting a result.
    pub fn reveal(&self, key: KeyId) -> Option<Vec<u8>> {
        self.transform(key).plaintext
    }
}

impl core::fmt::Debug for Probe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Probe")
            .field("codec", &self.codec)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CipherKind, DesEcb};

    #[test]
    fn job_probe_finds_secret() {
        let job = Job::from_plaintext(
            CipherKind::Des,
            Codec::BigEndian,
            b"Esta es una prueba de proyecto 2",
            123_456,
            "es una prueba",
            1 << 20,
        )
        .unwrap();
        let probe = Probe::from_job(&job).unwrap();
        assert!(probe.test(123_456));
        assert!(!probe.test(123_458));
        let text = probe.reveal(123_456).unwrap();
        assert!(text.starts_with(b"Esta es una prueba"));
    }

    #[test]
    fn rejected_key_never_matches() {
        let probe = Probe::new(
            Codec::BigEndian,
            Arc::new(DesEcb),
            Bytes::from_static(&[0; 8]),
            Arc::new(|_: &[u8]| true),
        );
        let candidate = probe.transform(0);
        assert_eq!(candidate.plaintext, None);
        assert!(!probe.verify(&candidate));
        assert!(probe.test(577));
    }

    #[test]
    fn repeated_calls_agree() {
        let probe = Probe::new(
            Codec::Des56,
            CipherKind::Des.build(),
            Bytes::from_static(b"abcdefgh"),
            Arc::new(|text: &[u8]| text[0] == 0),
        );
        for key in [3, 99, 1 << 40] {
            assert_eq!(probe.transform(key), probe.transform(key));
            assert_eq!(probe.test(key), probe.test(key));
        }
    }
}
