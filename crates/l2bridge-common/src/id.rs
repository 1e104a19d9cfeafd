//! Identifier helpers.

/// Length of the shortened form of a network or endpoint id.
pub const SHORT_ID_LENGTH: usize = 12;

/// Returns the first [`SHORT_ID_LENGTH`] characters of an id.
#[must_use]
pub fn short(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LENGTH) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Returns `len` random lowercase hex characters.
///
/// The randomness comes from a v4 UUID, so `len` is capped at 32.
#[must_use]
pub fn random_hex(len: usize) -> String {
    let uuid = uuid::Uuid::new_v4();
    let mut hex = hex::encode(uuid.as_bytes());
    hex.truncate(len);
    hex
}

/// Returns six random bytes.
#[must_use]
pub fn random_bytes6() -> [u8; 6] {
    let uuid = uuid::Uuid::new_v4();
    let mut out = [0u8; 6];
    out.copy_from_slice(&uuid.as_bytes()[..6]);
    out
}
