//! Per-provider signature schemes

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use voxway_core::crypto::constant_time_eq;
use voxway_core::{Result, VoxwayError};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Square-style: base64(HMAC-SHA256(notification_url || raw_body)).
///
/// Deployments sometimes sit behind a rewriting proxy, so the configured
/// notification URL is tried first and the actual request URL second.
pub fn verify_square(
    signature_key: &str,
    configured_url: Option<&str>,
    actual_url: &str,
    raw_body: &[u8],
    signature: &str,
) -> bool {
    let mut candidates = Vec::new();
    if let Some(url) = configured_url {
        candidates.push(url);
    }
    candidates.push(actual_url);

    for url in candidates {
        let mut signed = url.as_bytes().to_vec();
        signed.extend_from_slice(raw_body);
        let expected = b64(&hmac_sha256(signature_key.as_bytes(), &signed));
        if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return true;
        }
    }
    false
}

/// Stripe-style: header `t=<ts>,v1=<hex>`, signed payload `{ts}.{raw_body}`,
/// with a timestamp tolerance window.
pub fn verify_stripe(
    webhook_secret: &str,
    signature_header: &str,
    raw_body: &[u8],
    now_unix: i64,
    tolerance_secs: i64,
) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => signatures.push(v),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now_unix - timestamp).abs() > tolerance_secs {
        return false;
    }

    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(raw_body);
    let expected = hex::encode(hmac_sha256(webhook_secret.as_bytes(), &signed));

    signatures
        .iter()
        .any(|sig| constant_time_eq(expected.as_bytes(), sig.as_bytes()))
}

/// Crypto processor: hex(HMAC-SHA512(raw_body)).
pub fn verify_crypto_ipn(ipn_secret: &str, raw_body: &[u8], signature: &str) -> bool {
    let expected = hex::encode(hmac_sha512(ipn_secret.as_bytes(), raw_body));
    constant_time_eq(expected.as_bytes(), signature.to_lowercase().as_bytes())
}

/// ACH processor: base64(HMAC-SHA256(raw_body)).
pub fn verify_ach(webhook_secret: &str, raw_body: &[u8], signature: &str) -> bool {
    let expected = b64(&hmac_sha256(webhook_secret.as_bytes(), raw_body));
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Apply a verification result, honoring development mode when the secret is
/// missing.
pub fn require_verified(provider: &str, secret: Option<&str>, verified: bool) -> Result<()> {
    match secret {
        None => {
            tracing::warn!(
                provider = provider,
                "Webhook secret not configured, accepting unverified delivery"
            );
            Ok(())
        }
        Some(_) if verified => Ok(()),
        Some(_) => Err(VoxwayError::SignatureInvalid(format!(
            "{} webhook signature mismatch",
            provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_signature_roundtrip() {
        let key = "sq-signature-key";
        let url = "https://portal.example.com/webhooks/square";
        let body = br#"{"type":"payment.updated"}"#;

        let mut signed = url.as_bytes().to_vec();
        signed.extend_from_slice(body);
        let signature = b64(&hmac_sha256(key.as_bytes(), &signed));

        assert!(verify_square(key, Some(url), url, body, &signature));
        assert!(!verify_square(key, Some(url), url, body, "bogus"));
        assert!(!verify_square(key, Some(url), url, br#"{"tampered":1}"#, &signature));
    }

    #[test]
    fn test_square_tries_actual_url_on_mismatch() {
        let key = "sq-signature-key";
        let configured = "https://portal.example.com/webhooks/square";
        let actual = "https://portal.internal:8443/webhooks/square";
        let body = b"{}";

        let mut signed = actual.as_bytes().to_vec();
        signed.extend_from_slice(body);
        let signature = b64(&hmac_sha256(key.as_bytes(), &signed));

        assert!(verify_square(key, Some(configured), actual, body, &signature));
    }

    #[test]
    fn test_stripe_signature_roundtrip() {
        let secret = "whsec_test";
        let body = br#"{"type":"checkout.session.completed"}"#;
        let ts = 1_770_000_000i64;

        let mut signed = ts.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(body);
        let sig = hex::encode(hmac_sha256(secret.as_bytes(), &signed));
        let header = format!("t={},v1={}", ts, sig);

        assert!(verify_stripe(secret, &header, body, ts + 10, 300));
        assert!(!verify_stripe(secret, &header, body, ts + 301, 300));
        assert!(!verify_stripe(secret, &header, br#"{}"#, ts, 300));
        assert!(!verify_stripe(secret, "v1=deadbeef", body, ts, 300));
    }

    #[test]
    fn test_crypto_ipn_signature() {
        let secret = "ipn-secret";
        let body = br#"{"payment_status":"finished","order_id":"np-x"}"#;
        let signature = hex::encode(hmac_sha512(secret.as_bytes(), body));

        assert!(verify_crypto_ipn(secret, body, &signature));
        assert!(verify_crypto_ipn(secret, body, &signature.to_uppercase()));
        assert!(!verify_crypto_ipn(secret, body, "00ff"));
    }

    #[test]
    fn test_ach_signature() {
        let secret = "ach-secret";
        let body = br#"{"eventType":"invoice.updated"}"#;
        let signature = b64(&hmac_sha256(secret.as_bytes(), body));

        assert!(verify_ach(secret, body, &signature));
        assert!(!verify_ach(secret, body, "AAAA"));
    }

    #[test]
    fn test_require_verified() {
        assert!(require_verified("square", None, false).is_ok());
        assert!(require_verified("square", Some("k"), true).is_ok());
        let err = require_verified("square", Some("k"), false).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
