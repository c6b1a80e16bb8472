use keysweep::{Probe, Verdict};

/// The one line the reporting process prints to stdout.
pub fn render(verdict: Verdict) -> String {
    match verdict {
        Verdict::Found(key) => format!("key found: {key}"),
        Verdict::Exhausted => "not found".to_string(),
    }
}

/// Prints the result line and logs the decrypted text for a found key.
pub fn report(verdict: Verdict, probe: &Probe) {
    println!("{}", render(verdict));

    #[cfg(feature = "tracing")]
    if let Verdict::Found(key) = verdict {
        match probe.reveal(key) {
            Some(plaintext) => {
                let text = plaintext.split(|&b| b == 0).next().unwrap_or_default();
                tracing::info!(
                    key,
                    plaintext = %String::from_utf8_lossy(text),
                    "Decrypted ciphertext"
                );
            }
            None => tracing::warn!(key, "Found key no longer decrypts"),
        }
    }
    #[cfg(not(feature = "tracing"))]
    let _ = probe;
}
