//! Reads the search inputs from disk and builds the [`Job`].

use super::config::SearchConfig;
use bytes::Bytes;
use keysweep::{Error, Job, KeyId, Result};
use std::{fs, path::Path};

/// Loads the plaintext and phrase files, parses the secret key and encrypts.
///
/// # Errors
///
/// Returns [`Error::LoaderFailure`] for an unreadable file, an empty
/// plaintext or phrase, an unparsable key, a key outside the codec's domain
/// or a key the cipher rejects.
pub fn load_job(search: &SearchConfig) -> Result<Job> {
    let plaintext = read_joined(&search.plaintext_file, "plaintext")?;
    let phrase = read_joined(&search.phrase_file, "search phrase")?;
    if phrase.is_empty() {
        return Err(failure(format!(
            "search phrase file {} is empty",
            search.phrase_file.display()
        )));
    }
    let secret = parse_key(&search.secret_key)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        plaintext_len = plaintext.len(),
        phrase = %phrase,
        "Loaded search input"
    );

    Job::from_plaintext(
        search.cipher,
        search.codec,
        plaintext.as_bytes(),
        secret,
        Bytes::from(phrase),
        search.key_space,
    )
}

/// Reads a text file as one line: every line trimmed, blank lines dropped,
/// the rest joined with single spaces.
pub fn read_joined(path: &Path, what: &str) -> Result<String> {
    let text = fs::read_to_string(path)
        .map_err(|e| failure(format!("cannot read {what} file {}: {e}", path.display())))?;
    Ok(join_lines(&text))
}

pub fn join_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a decimal or `0x`-prefixed hex key.
pub fn parse_key(raw: &str) -> Result<KeyId> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => KeyId::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| failure(format!("secret key {raw:?} is not a key id: {e}")))
}

fn failure(reason: String) -> Error {
    Error::LoaderFailure { reason }
}
