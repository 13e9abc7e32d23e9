//! Twilio webhook signature validation.
//!
//! Twilio signs each webhook with HMAC-SHA1 over the full public URL
//! followed by the form parameters sorted by key, and sends the base64
//! digest in `X-Twilio-Signature`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Validate an `X-Twilio-Signature` header against the request.
///
/// `url` must be the externally visible URL Twilio posted to, including
/// scheme and query string; `params` are the raw form pairs.
#[must_use]
pub fn validate(auth_token: &str, url: &str, params: &[(String, String)], signature: &str) -> bool {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());

    let Ok(expected) = BASE64.decode(signature) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut payload = String::from(url);
        for (key, value) in sorted {
            payload.push_str(key);
            payload.push_str(value);
        }
        let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn params() -> Vec<(String, String)> {
        vec![
            ("EventType".to_string(), "onMessageAdded".to_string()),
            ("Body".to_string(), "hello".to_string()),
            ("Author".to_string(), "whatsapp:+15559998888".to_string()),
        ]
    }

    #[test]
    fn test_valid_signature_passes() {
        let url = "https://inbox.example.com/webhooks/twilio/conn-1";
        let signature = sign("token", url, &params());
        assert!(validate("token", url, &params(), &signature));
    }

    #[test]
    fn test_tampered_body_fails() {
        let url = "https://inbox.example.com/webhooks/twilio/conn-1";
        let signature = sign("token", url, &params());

        let mut tampered = params();
        tampered[1].1 = "transfer all funds".to_string();
        assert!(!validate("token", url, &tampered, &signature));
    }

    #[test]
    fn test_wrong_token_fails() {
        let url = "https://inbox.example.com/webhooks/twilio/conn-1";
        let signature = sign("token", url, &params());
        assert!(!validate("other-token", url, &params(), &signature));
    }

    #[test]
    fn test_garbage_signature_fails() {
        assert!(!validate(
            "token",
            "https://inbox.example.com/x",
            &params(),
            "not base64!!"
        ));
    }
}
