/// API key helpers: generation and log-safe display
use rand::Rng;

/// Bytes of randomness in a generated key (hex encoded, so twice as many characters).
const KEY_BYTES: usize = 32;

/// How much of a key may appear in logs.
const REDACTED_PREFIX_LEN: usize = 6;

/// Generate a new random API key.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Display a key by its prefix only, so full secrets never reach the logs.
pub fn redact(key: &str) -> String {
    let prefix: String = key.chars().take(REDACTED_PREFIX_LEN).collect();
    format!("{prefix}…")
}
