//! Key material normalization (Design Note 2, §9): the library accepts keys
//! as PEM, JWK, or raw bytes and normalizes them on entry to the internal
//! canonical form (`p256` signing/verifying keys), rather than duck-typing
//! through the rest of the pipeline.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::JwsError;

/// A JSON Web Key restricted to the EC P-256 shape this crate supports.
/// `d` is present only for private keys and must never be serialized into a
/// `kid` thumbprint (RFC 7638 covers only the public parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

/// Tagged enum of accepted key representations (public or private).
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// PEM-encoded SPKI (public) or PKCS#8 (private) key.
    Pem(String),
    /// JSON Web Key.
    Jwk(Jwk),
    /// Raw bytes: 32-byte scalar for private keys, or a SEC1 point
    /// (33 compressed / 65 uncompressed bytes) for public keys.
    Raw(Vec<u8>),
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        match self {
            KeyMaterial::Pem(s) => s.zeroize(),
            KeyMaterial::Jwk(jwk) => {
                if let Some(d) = jwk.d.as_mut() {
                    d.zeroize();
                }
            }
            KeyMaterial::Raw(bytes) => bytes.zeroize(),
        }
    }
}

impl KeyMaterial {
    pub fn into_signing_key(self) -> Result<SigningKey, JwsError> {
        match self {
            KeyMaterial::Pem(pem) => SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| JwsError::Key(format!("invalid PKCS#8 private key PEM: {e}"))),
            KeyMaterial::Jwk(jwk) => {
                let d = jwk
                    .d
                    .as_deref()
                    .ok_or_else(|| JwsError::Key("JWK has no private component \"d\"".to_string()))?;
                let bytes = URL_SAFE_NO_PAD
                    .decode(d)
                    .map_err(|e| JwsError::Key(format!("invalid base64url in JWK.d: {e}")))?;
                SigningKey::from_slice(&bytes)
                    .map_err(|e| JwsError::Key(format!("invalid private scalar: {e}")))
            }
            KeyMaterial::Raw(bytes) => SigningKey::from_slice(&bytes)
                .map_err(|e| JwsError::Key(format!("invalid private scalar: {e}"))),
        }
    }

    pub fn into_verifying_key(self) -> Result<VerifyingKey, JwsError> {
        match self {
            KeyMaterial::Pem(pem) => p256::PublicKey::from_public_key_pem(&pem)
                .map(|pk| VerifyingKey::from(pk))
                .map_err(|e| JwsError::Key(format!("invalid SPKI public key PEM: {e}"))),
            KeyMaterial::Jwk(jwk) => jwk_to_verifying_key(&jwk),
            KeyMaterial::Raw(bytes) => p256::PublicKey::from_sec1_bytes(&bytes)
                .map(|pk| VerifyingKey::from(pk))
                .map_err(|e| JwsError::Key(format!("invalid SEC1 public key bytes: {e}"))),
        }
    }
}

/// Converts a public JWK to a verifying key, rejecting anything but P-256.
pub fn jwk_to_verifying_key(jwk: &Jwk) -> Result<VerifyingKey, JwsError> {
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(JwsError::Key(format!(
            "unsupported JWK kty/crv: {}/{}",
            jwk.kty, jwk.crv
        )));
    }
    let x = URL_SAFE_NO_PAD
        .decode(&jwk.x)
        .map_err(|e| JwsError::Key(format!("invalid base64url in JWK.x: {e}")))?;
    let y = URL_SAFE_NO_PAD
        .decode(&jwk.y)
        .map_err(|e| JwsError::Key(format!("invalid base64url in JWK.y: {e}")))?;
    if x.len() != 32 || y.len() != 32 {
        return Err(JwsError::Key(
            "P-256 coordinates must be 32 bytes each".to_string(),
        ));
    }
    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);
    p256::PublicKey::from_sec1_bytes(&sec1)
        .map(|pk| VerifyingKey::from(pk))
        .map_err(|e| JwsError::Key(format!("invalid P-256 point: {e}")))
}

/// Converts a verifying key to its JWK representation.
pub fn verifying_key_to_jwk(key: &VerifyingKey) -> Jwk {
    let point = key.to_encoded_point(false);
    let x = point.x().expect("uncompressed point has x");
    let y = point.y().expect("uncompressed point has y");
    Jwk {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
        d: None,
    }
}

/// Computes the RFC 7638 JWK thumbprint of a public key: SHA-256 over the
/// canonical (lexicographically key-sorted, no whitespace) JSON
/// `{"crv":...,"kty":"EC","x":...,"y":...}`, base64url-encoded.
pub fn thumbprint(key: &VerifyingKey) -> String {
    let jwk = verifying_key_to_jwk(key);
    // BTreeMap guarantees key order matches RFC 7638's required sort.
    let mut canonical = std::collections::BTreeMap::new();
    canonical.insert("crv", jwk.crv.as_str());
    canonical.insert("kty", jwk.kty.as_str());
    canonical.insert("x", jwk.x.as_str());
    canonical.insert("y", jwk.y.as_str());
    let canonical_json = serde_json::to_string(&canonical).expect("map of strings always serializes");
    let digest = Sha256::digest(canonical_json.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn jwk_round_trip_preserves_thumbprint() {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = VerifyingKey::from(&signing);
        let jwk = verifying_key_to_jwk(&verifying);
        let recovered = jwk_to_verifying_key(&jwk).unwrap();
        assert_eq!(thumbprint(&verifying), thumbprint(&recovered));
    }

    #[test]
    fn rejects_non_p256_jwk() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: "P-384".to_string(),
            x: "AA".to_string(),
            y: "AA".to_string(),
            d: None,
        };
        assert!(jwk_to_verifying_key(&jwk).is_err());
    }

    #[test]
    fn thumbprint_is_stable_for_same_key() {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = VerifyingKey::from(&signing);
        assert_eq!(thumbprint(&verifying), thumbprint(&verifying));
    }
}
