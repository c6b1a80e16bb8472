use crate::{Error, Result};

/// Decides whether a candidate plaintext is the one being searched for.
///
/// Implementations must be pure and safe to call from several threads at
/// once.
pub trait Predicate: Send + Sync {
    fn matches(&self, plaintext: &[u8]) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn matches(&self, plaintext: &[u8]) -> bool {
        self(plaintext)
    }
}

/// Matches when a search phrase occurs in the plaintext.
///
/// The plaintext is read as a C string: only the bytes before the first NUL
/// are searched, so zero padding can never take part in a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainsPhrase {
    phrase: Box<[u8]>,
}

impl ContainsPhrase {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty phrase, which would
    /// match every key.
    pub fn new(phrase: impl Into<Vec<u8>>) -> Result<Self> {
        let phrase = phrase.into();
        if phrase.is_empty() {
            return Err(Error::invalid("search phrase must not be empty"));
        }
        Ok(Self {
            phrase: phrase.into_boxed_slice(),
        })
    }

    pub fn phrase(&self) -> &[u8] {
        &self.phrase
    }
}

impl Predicate for ContainsPhrase {
    fn matches(&self, plaintext: &[u8]) -> bool {
        let text = plaintext
            .iter()
            .position(|&b| b == 0)
            .map_or(plaintext, |nul| &plaintext[..nul]);
        text.windows(self.phrase.len())
            .any(|window| window == &*self.phrase)
    }
}
