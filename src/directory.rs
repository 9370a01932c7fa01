//! Directory client: best-effort JWKS and CRL discovery for issuers
//! (component J, §4.J).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys::Jwk;
use crate::transport::HttpFetch;

/// A certificate revocation list for one key, keyed by `kid` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crl {
    pub kid: String,
    pub method: String,
    pub ctr: u64,
    pub rids: Vec<String>,
}

/// One issuer's published keys and revocation lists (§3 "Directory entry").
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub iss: String,
    pub keys: Vec<Jwk>,
    pub crls: Vec<Crl>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// A directory of issuers, keyed by `iss` then by key `kid`, built via
/// [`from_urls`]. Consulted by a reader to resolve a signer's public key
/// when no explicit key is configured.
pub struct DirectoryClient {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryClient {
    /// Fetches JWKS and CRLs for each issuer URL. An issuer whose JWKS fetch
    /// fails is skipped entirely; an issuer whose CRL fetch fails for a
    /// given key simply omits that key's CRL (§4.J).
    pub async fn from_urls(fetch: &dyn HttpFetch, urls: &[String]) -> Self {
        let mut entries = Vec::with_capacity(urls.len());
        for url in urls {
            match fetch_issuer(fetch, url).await {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(issuer = %url, error = %err, "skipping issuer: JWKS fetch failed"),
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Resolves a public key by issuer URL and `kid`, in canonical JWK form.
    pub fn resolve(&self, iss: &str, kid: &str) -> Option<&Jwk> {
        self.entries
            .iter()
            .find(|e| e.iss == iss)
            .and_then(|e| e.keys.iter().find(|k| jwk_kid(k).as_deref() == Some(kid)))
    }

    /// Indexes every known key by `kid` across all issuers, for lookup when
    /// the caller only has a `kid` and not an `iss`. Keys that fail to
    /// normalize (e.g. an unsupported curve) are skipped.
    pub fn keys_by_kid(&self) -> HashMap<String, &Jwk> {
        let mut map = HashMap::new();
        for entry in &self.entries {
            for key in &entry.keys {
                if let Some(kid) = jwk_kid(key) {
                    map.insert(kid, key);
                }
            }
        }
        map
    }
}

/// Computes a JWK's `kid` (its RFC 7638 thumbprint), or `None` if the key
/// cannot be normalized to a P-256 verifying key (e.g. an unsupported curve
/// such as P-384/P-521) — skipped rather than panicking, mirroring the
/// CRL-fetch-failure tolerance below.
fn jwk_kid(jwk: &Jwk) -> Option<String> {
    match crate::keys::jwk_to_verifying_key(jwk) {
        Ok(key) => Some(crate::keys::thumbprint(&key)),
        Err(err) => {
            warn!(kty = %jwk.kty, crv = %jwk.crv, error = %err, "skipping directory key: unsupported or invalid JWK");
            None
        }
    }
}

async fn fetch_issuer(fetch: &dyn HttpFetch, issuer_url: &str) -> Result<DirectoryEntry, String> {
    let base = issuer_url.trim_end_matches('/');
    let jwks_url = format!("{base}/.well-known/jwks.json");
    let resp = fetch.get(&jwks_url).await.map_err(|e| e.to_string())?;
    if !resp.is_success() {
        return Err(format!("GET {jwks_url} returned status {}", resp.status));
    }
    let text = resp.text().map_err(|e| e.to_string())?;
    let jwks: JwksResponse = serde_json::from_str(&text).map_err(|e| format!("invalid JWKS JSON: {e}"))?;

    let mut crls = Vec::new();
    for key in &jwks.keys {
        let Some(kid) = jwk_kid(key) else {
            continue;
        };
        let crl_url = format!("{base}/.well-known/crl/{kid}.json");
        if let Ok(resp) = fetch.get(&crl_url).await {
            if resp.is_success() {
                if let Ok(text) = resp.text() {
                    if let Ok(crl) = serde_json::from_str::<Crl>(&text) {
                        crls.push(crl);
                    }
                }
            }
        }
    }

    Ok(DirectoryEntry {
        iss: issuer_url.to_string(),
        keys: jwks.keys,
        crls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShlError;
    use crate::keys::verifying_key_to_jwk;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use p256::ecdsa::{SigningKey, VerifyingKey};
    use rand::rngs::OsRng;

    struct MockFetch {
        jwks: String,
        fail_crl: bool,
    }

    #[async_trait]
    impl HttpFetch for MockFetch {
        async fn get(&self, url: &str) -> Result<HttpResponse, ShlError> {
            if url.ends_with("jwks.json") {
                Ok(HttpResponse {
                    status: 200,
                    body: self.jwks.clone().into_bytes(),
                })
            } else if self.fail_crl {
                Ok(HttpResponse {
                    status: 404,
                    body: Vec::new(),
                })
            } else {
                Ok(HttpResponse {
                    status: 200,
                    body: br#"{"kid":"k1","method":"rid","ctr":1,"rids":[]}"#.to_vec(),
                })
            }
        }

        async fn post_json(&self, _url: &str, _body: serde_json::Value) -> Result<HttpResponse, ShlError> {
            unreachable!()
        }
    }

    fn sample_jwks() -> (VerifyingKey, String) {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = VerifyingKey::from(&signing);
        let jwk = verifying_key_to_jwk(&verifying);
        let body = serde_json::json!({"keys": [jwk]}).to_string();
        (verifying, body)
    }

    #[tokio::test]
    async fn resolves_key_when_crl_fetch_succeeds() {
        let (verifying, jwks) = sample_jwks();
        let fetch = MockFetch {
            jwks,
            fail_crl: false,
        };
        let dir = DirectoryClient::from_urls(&fetch, &["https://issuer.example.org".to_string()]).await;
        let kid = crate::keys::thumbprint(&verifying);
        assert!(dir.resolve("https://issuer.example.org", &kid).is_some());
        assert_eq!(dir.entries()[0].crls.len(), 1);
    }

    #[tokio::test]
    async fn omits_crl_when_crl_fetch_fails_but_keeps_key() {
        let (verifying, jwks) = sample_jwks();
        let fetch = MockFetch { jwks, fail_crl: true };
        let dir = DirectoryClient::from_urls(&fetch, &["https://issuer.example.org".to_string()]).await;
        let kid = crate::keys::thumbprint(&verifying);
        assert!(dir.resolve("https://issuer.example.org", &kid).is_some());
        assert!(dir.entries()[0].crls.is_empty());
    }

    #[tokio::test]
    async fn skips_issuer_when_jwks_fetch_fails() {
        struct FailFetch;
        #[async_trait]
        impl HttpFetch for FailFetch {
            async fn get(&self, _url: &str) -> Result<HttpResponse, ShlError> {
                Ok(HttpResponse {
                    status: 500,
                    body: Vec::new(),
                })
            }
            async fn post_json(&self, _url: &str, _body: serde_json::Value) -> Result<HttpResponse, ShlError> {
                unreachable!()
            }
        }
        let dir = DirectoryClient::from_urls(&FailFetch, &["https://unreachable.example.org".to_string()]).await;
        assert!(dir.entries().is_empty());
    }

    #[tokio::test]
    async fn skips_unsupported_curve_key_instead_of_panicking() {
        let (verifying, jwks) = sample_jwks();
        let good_kid = crate::keys::thumbprint(&verifying);
        let unsupported = Jwk {
            kty: "EC".to_string(),
            crv: "P-384".to_string(),
            x: "AA".to_string(),
            y: "AA".to_string(),
            d: None,
        };
        let mut keys: Vec<Jwk> = serde_json::from_str::<JwksResponse>(&jwks).unwrap().keys;
        keys.push(unsupported);
        let body = serde_json::json!({"keys": keys}).to_string();
        let fetch = MockFetch {
            jwks: body,
            fail_crl: false,
        };
        let dir = DirectoryClient::from_urls(&fetch, &["https://issuer.example.org".to_string()]).await;
        assert_eq!(dir.entries()[0].keys.len(), 2);
        assert!(dir.resolve("https://issuer.example.org", &good_kid).is_some());
        assert_eq!(dir.keys_by_kid().len(), 1);
    }
}
