//! Phone number helpers
//!
//! Numbers are stored in E.164. Lead uploads and provider webhooks arrive in
//! whatever shape the source produced, so normalization lives here.

use crate::error::{Result, VoxwayError};

/// Strip everything but digits.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a raw phone number to E.164.
///
/// 10-digit NANPA numbers get a `+1` prefix; 11 digits starting with 1 are
/// treated the same. Anything else keeps its digits with a `+`. Lengths
/// outside 8..=15 digits are rejected.
pub fn normalize_e164(raw: &str) -> Result<String> {
    let digits = digits_only(raw);

    let normalized = if digits.len() == 10 {
        format!("+1{}", digits)
    } else if digits.len() == 11 && digits.starts_with('1') {
        format!("+{}", digits)
    } else {
        format!("+{}", digits)
    };

    let len = normalized.len() - 1;
    if !(8..=15).contains(&len) {
        return Err(VoxwayError::Validation(format!(
            "Phone number has {} digits, expected 8-15",
            len
        )));
    }

    Ok(normalized)
}

/// Last 10 digits of a number, for loose caller matching.
pub fn last_10_digits(raw: &str) -> String {
    let digits = digits_only(raw);
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

/// NPA (area code) of a NANPA number, if it has one.
pub fn npa(raw: &str) -> Option<String> {
    let digits = digits_only(raw);
    let national = if digits.len() == 11 && digits.starts_with('1') {
        &digits[1..]
    } else if digits.len() == 10 {
        &digits[..]
    } else {
        return None;
    };
    Some(national[..3].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_nanpa_10_digit() {
        assert_eq!(normalize_e164("4155551212").unwrap(), "+14155551212");
        assert_eq!(normalize_e164("(415) 555-1212").unwrap(), "+14155551212");
    }

    #[test]
    fn test_normalize_nanpa_11_digit() {
        assert_eq!(normalize_e164("14155551212").unwrap(), "+14155551212");
        assert_eq!(normalize_e164("+1 415 555 1212").unwrap(), "+14155551212");
    }

    #[test]
    fn test_normalize_international() {
        assert_eq!(normalize_e164("+442071838750").unwrap(), "+442071838750");
    }

    #[test]
    fn test_normalize_rejects_short_and_long() {
        assert!(normalize_e164("1234567").is_err());
        assert!(normalize_e164("1234567890123456").is_err());
    }

    #[test]
    fn test_last_10_digits() {
        assert_eq!(last_10_digits("+14155551212"), "4155551212");
        assert_eq!(last_10_digits("5551212"), "5551212");
    }

    #[test]
    fn test_npa() {
        assert_eq!(npa("+18335551212").as_deref(), Some("833"));
        assert_eq!(npa("4155551212").as_deref(), Some("415"));
        assert_eq!(npa("+442071838750"), None);
    }
}
