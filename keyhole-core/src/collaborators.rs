//! Capabilities the login flow consumes but does not implement itself.
//!
//! - [`TokenSource`]: unpredictable strings for `state` and `nonce`.
//! - [`BrowserLauncher`]: opens the authorization URL for the user.
//! - [`TokenVerifier`]: provider-specific ID token verification.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::de::DeserializeOwned;

use crate::error::VerifyError;

/// Source of opaque, unguessable tokens.
pub trait TokenSource: Send + Sync {
    fn generate(&self) -> std::io::Result<String>;
}

/// Opens a URL in the user's browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Verifies a raw ID token (signature, issuer, audience, expiry).
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw_token: &str) -> Result<VerifiedIdToken, VerifyError>;
}

/// Claims of an ID token that passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdToken {
    claims: serde_json::Value,
}

impl VerifiedIdToken {
    pub fn from_claims(claims: serde_json::Value) -> Self {
        Self { claims }
    }

    /// Deserialize the claim set into `T`.
    pub fn decode_claims<T: DeserializeOwned>(&self) -> Result<T, VerifyError> {
        Ok(T::deserialize(&self.claims)?)
    }

    pub fn claims(&self) -> &serde_json::Value {
        &self.claims
    }
}

/// 32 random bytes from the thread RNG, base64url-encoded without padding.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenSource;

impl TokenSource for RandomTokenSource {
    fn generate(&self) -> std::io::Result<String> {
        let mut bytes = [0u8; 32];
        rand::thread_rng()
            .try_fill(&mut bytes)
            .map_err(std::io::Error::other)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Launches the platform default browser via the `open` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_random_token_length() {
        let token = RandomTokenSource.generate().unwrap();
        // base64url of 32 bytes = 43 characters
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
    }

    #[test]
    fn test_random_token_uniqueness() {
        let a = RandomTokenSource.generate().unwrap();
        let b = RandomTokenSource.generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decode_claims() {
        #[derive(Deserialize)]
        struct Claims {
            nonce: String,
            #[serde(default)]
            sub: Option<String>,
        }

        let token = VerifiedIdToken::from_claims(serde_json::json!({
            "nonce": "n1",
            "aud": "client"
        }));
        let claims: Claims = token.decode_claims().unwrap();
        assert_eq!(claims.nonce, "n1");
        assert!(claims.sub.is_none());
    }

    #[test]
    fn test_decode_claims_wrong_shape() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Claims {
            nonce: String,
        }

        let token = VerifiedIdToken::from_claims(serde_json::json!({ "nonce": 42 }));
        let result: Result<Claims, _> = token.decode_claims();
        assert!(matches!(result, Err(VerifyError::Claims(_))));
    }
}
