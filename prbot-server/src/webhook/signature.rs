use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Check a `sha256=<hex>` header against the HMAC of `payload`, in constant
/// time.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// The `sha256=<hex>` header value GitHub would send for `payload`.
pub fn sign_github_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// GitLab sends the shared secret verbatim.
pub fn verify_gitlab_token(secret: &str, token: &str) -> bool {
    !token.is_empty() && token == secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_signature_round_trip() {
        let payload = br#"{"action":"created"}"#;
        let header = sign_github_payload("It's a Secret to Everybody", payload);
        assert!(header.starts_with("sha256="));
        assert!(verify_github_signature(
            "It's a Secret to Everybody",
            payload,
            &header
        ));
        assert!(!verify_github_signature("other secret", payload, &header));
        assert!(!verify_github_signature(
            "It's a Secret to Everybody",
            b"tampered",
            &header
        ));
    }

    #[test]
    fn test_github_signature_known_vector() {
        // From GitHub's webhook documentation.
        assert!(verify_github_signature(
            "It's a Secret to Everybody",
            b"Hello, World!",
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        ));
    }

    #[test]
    fn test_github_signature_malformed() {
        assert!(!verify_github_signature("s", b"x", "sha1=abcd"));
        assert!(!verify_github_signature("s", b"x", "sha256=not-hex"));
        assert!(!verify_github_signature("s", b"x", ""));
    }

    #[test]
    fn test_gitlab_token() {
        assert!(verify_gitlab_token("s3cret", "s3cret"));
        assert!(!verify_gitlab_token("s3cret", "S3cret"));
        assert!(!verify_gitlab_token("", ""));
    }
}
