//! Access locators handed out for stored objects.
//!
//! Fast-tier locators are signed and expire, so readers must ask for a
//! fresh one instead of caching. Durable-tier locators are stable URLs.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How a backend turns a key into a locator.
#[derive(Clone, Debug)]
pub enum LocatorPolicy {
    /// Time-limited, signed locator.
    Signed(LocatorSigner),
    /// Permanent `{base_url}/{key}`.
    Stable { base_url: String },
}

impl LocatorPolicy {
    pub fn expires(&self) -> bool {
        matches!(self, LocatorPolicy::Signed(_))
    }

    pub fn locate(&self, key: &str, now: DateTime<Utc>) -> String {
        match self {
            LocatorPolicy::Signed(signer) => signer.sign(key, now),
            LocatorPolicy::Stable { base_url } => {
                format!("{}/{}", base_url.trim_end_matches('/'), key)
            }
        }
    }
}

/// Issues and checks `?expires=..&signature=..` locators.
#[derive(Clone)]
pub struct LocatorSigner {
    base_url: String,
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for LocatorSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorSigner")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl LocatorSigner {
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    /// Build a locator for `key` valid until `now + ttl`.
    pub fn sign(&self, key: &str, now: DateTime<Utc>) -> String {
        let expires = (now + self.ttl).timestamp();
        format!(
            "{}/{}?expires={}&signature={}",
            self.base_url,
            key,
            expires,
            self.signature(key, expires)
        )
    }

    /// Check a signature presented for `key`. Expired or forged locators fail.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        match self.mac(key, expires) {
            Some(mac) => mac.verify_slice(&presented).is_ok(),
            None => false,
        }
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        match self.mac(key, expires) {
            Some(mac) => URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()),
            None => String::new(),
        }
    }

    /// HMAC-SHA256 over `key` and `expires`, NUL separated.
    fn mac(&self, key: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(key.as_bytes());
        mac.update(&[0u8]);
        mac.update(expires.to_string().as_bytes());
        Some(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> LocatorSigner {
        LocatorSigner::new("http://localhost:3000/objects/", "s3cret", Duration::hours(24))
    }

    fn parts(locator: &str) -> (i64, String) {
        let query = locator.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }
        (expires, signature)
    }

    #[test]
    fn signed_locator_round_trips_until_expiry() {
        let now = Utc::now();
        let locator = signer().sign("user-1/a.txt", now);
        assert!(locator.starts_with("http://localhost:3000/objects/user-1/a.txt?expires="));

        let (expires, signature) = parts(&locator);
        assert!(signer().verify("user-1/a.txt", expires, &signature, now));
        assert!(!signer().verify("user-1/a.txt", expires, &signature, now + Duration::hours(25)));
    }

    #[test]
    fn signature_is_bound_to_key_and_secret() {
        let now = Utc::now();
        let (expires, signature) = parts(&signer().sign("user-1/a.txt", now));
        assert!(!signer().verify("user-2/a.txt", expires, &signature, now));

        let other = LocatorSigner::new("http://localhost:3000/objects", "other", Duration::hours(24));
        assert!(!other.verify("user-1/a.txt", expires, &signature, now));
    }

    #[test]
    fn malformed_or_truncated_signature_is_rejected() {
        let now = Utc::now();
        let (expires, signature) = parts(&signer().sign("user-1/a.txt", now));
        assert!(!signer().verify("user-1/a.txt", expires, "not base64!", now));
        assert!(!signer().verify("user-1/a.txt", expires, &signature[..10], now));
        assert!(!signer().verify("user-1/a.txt", expires + 60, &signature, now));
    }

    #[test]
    fn stable_policy_joins_base_and_key() {
        let policy = LocatorPolicy::Stable {
            base_url: "https://archive.example.com/".into(),
        };
        assert_eq!(
            policy.locate("user-1/a.txt", Utc::now()),
            "https://archive.example.com/user-1/a.txt"
        );
    }
}
