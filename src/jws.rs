//! ES256 JWS signer/verifier (component C, §4.C).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deflate::{raw_deflate, raw_inflate};
use crate::error::JwsError;
use crate::keys::{self, KeyMaterial};
use crate::vc::Vc;

/// Compact JWS protected header (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    pub kid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

/// The JWT payload carried by a SMART Health Card (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtPayload {
    pub iss: String,
    pub nbf: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub vc: Vc,
}

/// Options for [`sign`].
#[derive(Debug, Clone, Copy)]
pub struct SignOptions {
    pub enable_compression: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            enable_compression: true,
        }
    }
}

/// Options for [`verify`].
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub verify_expiration: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            verify_expiration: true,
        }
    }
}

fn validate_payload(payload: &JwtPayload) -> Result<(), JwsError> {
    if payload.iss.is_empty() {
        return Err(JwsError::PayloadValidation("iss is required".to_string()));
    }
    if let Some(exp) = payload.exp {
        if exp <= payload.nbf {
            return Err(JwsError::PayloadValidation(
                "exp must be greater than nbf".to_string(),
            ));
        }
    }
    Ok(())
}

/// Signs `payload`, producing a compact ES256 JWS (§4.C).
pub fn sign(
    payload: &JwtPayload,
    priv_key: KeyMaterial,
    pub_key: KeyMaterial,
    opts: SignOptions,
) -> Result<String, JwsError> {
    validate_payload(payload)?;

    let signing_key: SigningKey = priv_key.into_signing_key()?;
    let verifying_key: VerifyingKey = pub_key.into_verifying_key()?;
    let kid = keys::thumbprint(&verifying_key);

    let payload_json = serde_json::to_vec(payload)
        .map_err(|e| JwsError::Malformed(format!("payload serialization failed: {e}")))?;

    let (payload_bytes, zip) = if opts.enable_compression {
        (raw_deflate(&payload_json).map_err(|e| JwsError::Malformed(format!("deflate failed: {e}")))?, Some("DEF".to_string()))
    } else {
        (payload_json, None)
    };

    let header = JwsHeader {
        alg: "ES256".to_string(),
        kid,
        zip,
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| JwsError::Malformed(format!("header serialization failed: {e}")))?;

    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_bytes);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verifies a compact ES256 JWS and returns its parsed payload (§4.C).
pub fn verify(jws: &str, pub_key: KeyMaterial, opts: VerifyOptions) -> Result<JwtPayload, JwsError> {
    if jws.is_empty() {
        return Err(JwsError::PayloadValidation("jws must not be empty".to_string()));
    }

    let parts: Vec<&str> = jws.split('.').collect();
    if parts.len() != 3 {
        return Err(JwsError::Malformed(format!(
            "expected 3 compact segments, got {}",
            parts.len()
        )));
    }
    let (header_b64, payload_b64, signature_b64) = (parts[0], parts[1], parts[2]);

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| JwsError::Malformed(format!("invalid header base64url: {e}")))?;
    let header: JwsHeader = serde_json::from_slice(&header_json)
        .map_err(|e| JwsError::Malformed(format!("invalid header JSON: {e}")))?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| JwsError::Malformed(format!("invalid signature base64url: {e}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| JwsError::Malformed("ES256 signature must be 64 bytes".to_string()))?;

    let verifying_key: VerifyingKey = pub_key.into_verifying_key()?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwsError::SignatureVerification)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwsError::Malformed(format!("invalid payload base64url: {e}")))?;
    let payload_bytes = if header.zip.as_deref() == Some("DEF") {
        raw_inflate(&payload_bytes).map_err(|e| JwsError::Malformed(format!("inflate failed: {e}")))?
    } else {
        payload_bytes
    };

    let payload: JwtPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| JwsError::PayloadValidation(format!("invalid payload JSON: {e}")))?;

    if opts.verify_expiration {
        if let Some(exp) = payload.exp {
            let now = chrono::Utc::now().timestamp();
            if exp <= now {
                return Err(JwsError::Expiration { exp, now });
            }
        }
    }

    Ok(payload)
}

/// Parses just the protected header without verifying the signature — used
/// by readers to pick a key/issuer before fetching JWKS (component J).
pub fn peek_header(jws: &str) -> Result<JwsHeader, JwsError> {
    let header_b64 = jws
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| JwsError::Malformed("missing header segment".to_string()))?;
    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| JwsError::Malformed(format!("invalid header base64url: {e}")))?;
    serde_json::from_slice(&header_json).map_err(|e| JwsError::Malformed(format!("invalid header JSON: {e}")))
}

/// Parses a JWS payload as raw JSON without verifying the signature — an
/// internal helper, not exposed as a trusted-data path.
#[allow(dead_code)]
pub(crate) fn peek_payload_unverified(jws: &str) -> Result<Value, JwsError> {
    let parts: Vec<&str> = jws.split('.').collect();
    if parts.len() != 3 {
        return Err(JwsError::Malformed("expected 3 compact segments".to_string()));
    }
    let header: JwsHeader = peek_header(jws)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| JwsError::Malformed(format!("invalid payload base64url: {e}")))?;
    let payload_bytes = if header.zip.as_deref() == Some("DEF") {
        raw_inflate(&payload_bytes).map_err(|e| JwsError::Malformed(format!("inflate failed: {e}")))?
    } else {
        payload_bytes
    };
    serde_json::from_slice(&payload_bytes).map_err(|e| JwsError::PayloadValidation(e.to_string()))
}
