//! OpenID Connect ID token verification.
//!
//! Fetches the provider's discovery document and JWKS once, then verifies RS256
//! signatures with `jsonwebtoken`, requiring `exp`, `iat`, `aud` and `iss` and
//! checking issuer and audience. Nonce comparison is left to the callback
//! handler, which owns the expected value.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

use crate::collaborators::{TokenVerifier, VerifiedIdToken};
use crate::error::VerifyError;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Clone)]
struct RsaKey {
    kid: Option<String>,
    n: String,
    e: String,
}

/// [`TokenVerifier`] backed by a provider's published RSA signing keys.
#[derive(Debug, Clone)]
pub struct OidcVerifier {
    issuer: String,
    client_id: String,
    keys: Vec<RsaKey>,
}

impl OidcVerifier {
    /// Fetch discovery and JWKS for `issuer` and build a verifier for `client_id`.
    pub async fn discover(issuer: &str, client_id: &str) -> Result<Self, VerifyError> {
        let client = reqwest::Client::new();
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        let discovery: DiscoveryDocument = client
            .get(&discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if discovery.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(VerifyError::Discovery {
                message: format!(
                    "issuer mismatch: expected '{}', discovery returned '{}'",
                    issuer, discovery.issuer
                ),
            });
        }
        if discovery.jwks_uri.trim().is_empty() {
            return Err(VerifyError::Discovery {
                message: "discovery document is missing jwks_uri".to_string(),
            });
        }

        let jwks: JwksDocument = client
            .get(&discovery.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(issuer = %discovery.issuer, keys = jwks.keys.len(), "Loaded provider signing keys");
        Self::from_jwks(&discovery.issuer, client_id, jwks)
    }

    /// Build a verifier from an already-fetched key set.
    pub fn from_jwks(
        issuer: &str,
        client_id: &str,
        jwks: JwksDocument,
    ) -> Result<Self, VerifyError> {
        let keys: Vec<RsaKey> = jwks
            .keys
            .into_iter()
            .filter(|key| key.kty == "RSA")
            .filter(|key| key.alg.as_deref().is_none_or(|alg| alg == "RS256"))
            .filter_map(|key| {
                let n = key.n.filter(|v| !v.trim().is_empty())?;
                let e = key.e.filter(|v| !v.trim().is_empty())?;
                let kid = key.kid.filter(|v| !v.trim().is_empty());
                Some(RsaKey { kid, n, e })
            })
            .collect();

        if keys.is_empty() {
            return Err(VerifyError::Discovery {
                message: "jwks does not contain usable RSA keys".to_string(),
            });
        }

        Ok(Self {
            issuer: issuer.to_string(),
            client_id: client_id.to_string(),
            keys,
        })
    }

    fn key_for(&self, kid: Option<&str>) -> Result<&RsaKey, VerifyError> {
        let found = match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            // Without a kid the choice is only unambiguous for a single key.
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        };
        found.ok_or_else(|| VerifyError::InvalidToken {
            message: format!("no signing key for kid {:?}", kid),
        })
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, raw_token: &str) -> Result<VerifiedIdToken, VerifyError> {
        let header = decode_header(raw_token)?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::InvalidToken {
                message: format!("unsupported signing algorithm {:?}", header.alg),
            });
        }

        let key = self.key_for(header.kid.as_deref())?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.required_spec_claims = HashSet::from([
            "exp".to_string(),
            "iat".to_string(),
            "aud".to_string(),
            "iss".to_string(),
        ]);

        let token = decode::<serde_json::Value>(raw_token, &decoding_key, &validation)?;
        Ok(VerifiedIdToken::from_claims(token.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{EncodingKey, Header, encode, get_current_timestamp};
    use pretty_assertions::assert_eq;

    const ISSUER: &str = "https://id.example.com";

    /// Private half of the test signing key; `TEST_MODULUS` is its public modulus.
    const TEST_SIGNING_KEY: &str = include_str!("../tests/fixtures/id_token_signing.pem");
    const TEST_MODULUS: &str = "9z5HPO74oeR7Yoe6Pb7Yyau62BpEsrzhORiQHSY5U_KxxZiZW-xX8RH4EHzy2vwOMxUKu6FCibOtSO2214urcMViTfR14XD79J0KHxubNcJhwkWuKdjaRkFoSkgX712vZ5bqnWF9nWH_-OI_58yIvIfgXCzOHaym3a0p3hMEslqqSCcSZ1g7mMVqVYed7BRBp6CXzVBnRNWGHtaD_Yz1slU4VaKUNivwwJ_CuIypQEcFtsYVv42kMDWz5P38j0F08drLHSoAUC-Tcjrh1WTiD3bVg0SCKMqOH1LWyPif3Bl7bPKsA-OBK28QQd58pJcyK1Rne4fOhYsh5ztIYjqcVQ";

    fn rsa_jwk(kid: Option<&str>) -> Jwk {
        Jwk {
            kid: kid.map(str::to_string),
            kty: "RSA".into(),
            alg: Some("RS256".into()),
            n: Some(TEST_MODULUS.into()),
            e: Some("AQAB".into()),
        }
    }

    fn unsigned_token(header: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = URL_SAFE_NO_PAD.encode(r#"{"nonce":"n1"}"#);
        format!("{header}.{payload}.c2ln")
    }

    #[test]
    fn test_from_jwks_filters_unusable_keys() {
        let jwks = JwksDocument {
            keys: vec![
                Jwk {
                    kty: "EC".into(),
                    ..rsa_jwk(Some("ec"))
                },
                Jwk {
                    alg: Some("RS512".into()),
                    ..rsa_jwk(Some("rs512"))
                },
                Jwk {
                    n: None,
                    ..rsa_jwk(Some("no-modulus"))
                },
                rsa_jwk(Some("good")),
            ],
        };

        let verifier = OidcVerifier::from_jwks(ISSUER, "client", jwks).unwrap();
        assert_eq!(verifier.keys.len(), 1);
        assert!(verifier.key_for(Some("good")).is_ok());
        assert!(verifier.key_for(Some("ec")).is_err());
    }

    #[test]
    fn test_from_jwks_without_rsa_keys() {
        let jwks = JwksDocument { keys: vec![] };
        let err = OidcVerifier::from_jwks(ISSUER, "client", jwks).unwrap_err();
        assert!(matches!(err, VerifyError::Discovery { .. }));
    }

    #[test]
    fn test_key_without_kid_needs_single_key() {
        let single = OidcVerifier::from_jwks(
            ISSUER,
            "client",
            JwksDocument {
                keys: vec![rsa_jwk(None)],
            },
        )
        .unwrap();
        assert!(single.key_for(None).is_ok());

        let many = OidcVerifier::from_jwks(
            ISSUER,
            "client",
            JwksDocument {
                keys: vec![rsa_jwk(Some("a")), rsa_jwk(Some("b"))],
            },
        )
        .unwrap();
        assert!(many.key_for(None).is_err());
        assert!(many.key_for(Some("b")).is_ok());
    }

    fn verifier() -> OidcVerifier {
        OidcVerifier::from_jwks(
            ISSUER,
            "client",
            JwksDocument {
                keys: vec![rsa_jwk(Some("k1"))],
            },
        )
        .unwrap()
    }

    fn claims(issuer: &str, audience: &str, expires_at: u64) -> serde_json::Value {
        serde_json::json!({
            "iss": issuer,
            "aud": audience,
            "sub": "4242",
            "iat": get_current_timestamp(),
            "exp": expires_at,
            "nonce": "n1",
        })
    }

    fn sign(claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("k1".into());
        let key = EncodingKey::from_rsa_pem(TEST_SIGNING_KEY.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    fn in_one_hour() -> u64 {
        get_current_timestamp() + 3600
    }

    #[tokio::test]
    async fn test_verifies_signed_token() {
        let token = sign(&claims(ISSUER, "client", in_one_hour()));
        let verified = verifier().verify(&token).await.unwrap();

        assert_eq!(verified.claims()["nonce"], "n1");
        assert_eq!(verified.claims()["sub"], "4242");
    }

    #[tokio::test]
    async fn test_rejects_wrong_audience() {
        let token = sign(&claims(ISSUER, "someone-else", in_one_hour()));
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Jwt(_)));
    }

    #[tokio::test]
    async fn test_rejects_wrong_issuer() {
        let token = sign(&claims("https://evil.example.com", "client", in_one_hour()));
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Jwt(_)));
    }

    #[tokio::test]
    async fn test_rejects_expired_token() {
        let token = sign(&claims(ISSUER, "client", get_current_timestamp() - 3600));
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Jwt(_)));
    }

    #[tokio::test]
    async fn test_rejects_missing_expiry() {
        let mut claims = claims(ISSUER, "client", in_one_hour());
        claims.as_object_mut().unwrap().remove("exp");
        let err = verifier().verify(&sign(&claims)).await.unwrap_err();
        assert!(matches!(err, VerifyError::Jwt(_)));
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let err = verifier().verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, VerifyError::Jwt(_)));
    }

    #[tokio::test]
    async fn test_rejects_symmetric_tokens() {
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &serde_json::json!({ "nonce": "n1" }),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn test_rejects_unknown_kid() {
        let token = unsigned_token(serde_json::json!({ "alg": "RS256", "kid": "rotated" }));
        let err = verifier().verify(&token).await.unwrap_err();
        match err {
            VerifyError::InvalidToken { message } => assert!(message.contains("rotated")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let token = unsigned_token(serde_json::json!({ "alg": "RS256", "kid": "k1" }));
        assert!(verifier().verify(&token).await.is_err());
    }

    async fn serve_provider(issuer_override: Option<&'static str>) -> String {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let discovery = serde_json::json!({
            "issuer": issuer_override.map(str::to_string).unwrap_or_else(|| base.clone()),
            "jwks_uri": format!("{base}/keys"),
        });
        let jwks = serde_json::json!({
            "keys": [{
                "kid": "k1",
                "kty": "RSA",
                "alg": "RS256",
                "n": TEST_MODULUS,
                "e": "AQAB",
            }]
        });

        let app = axum::Router::new()
            .route(
                "/.well-known/openid-configuration",
                axum::routing::get(move || async move { axum::Json(discovery) }),
            )
            .route(
                "/keys",
                axum::routing::get(move || async move { axum::Json(jwks) }),
            );
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        base
    }

    #[tokio::test]
    async fn test_discover_loads_keys() {
        let issuer = serve_provider(None).await;
        let verifier = OidcVerifier::discover(&issuer, "client").await.unwrap();
        assert_eq!(verifier.issuer, issuer);
        assert!(verifier.key_for(Some("k1")).is_ok());

        let token = sign(&claims(&issuer, "client", in_one_hour()));
        assert!(verifier.verify(&token).await.is_ok());
    }

    #[test]
    fn test_discovery_needs_only_issuer_and_jwks_uri() {
        let discovery: DiscoveryDocument = serde_json::from_value(serde_json::json!({
            "issuer": ISSUER,
            "jwks_uri": "https://id.example.com/keys",
            "response_types_supported": ["id_token"],
        }))
        .unwrap();
        assert_eq!(discovery.jwks_uri, "https://id.example.com/keys");
    }

    #[tokio::test]
    async fn test_discover_rejects_issuer_mismatch() {
        let issuer = serve_provider(Some("https://evil.example.com")).await;
        let err = OidcVerifier::discover(&issuer, "client").await.unwrap_err();
        assert!(matches!(err, VerifyError::Discovery { .. }));
    }
}
