//! Small utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generates an 8-hex-char id, suitable for approval request ids.
#[must_use]
pub fn short_hex_id() -> String {
    let bytes: [u8; 4] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hex_id_has_expected_length() {
        assert_eq!(short_hex_id().len(), 8);
    }

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }
}
