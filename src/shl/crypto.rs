//! SHL file crypto: JWE compact encrypt/decrypt, `alg=dir`, `enc=A256GCM`
//! (component G, §4.G).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::deflate::{raw_deflate, raw_inflate};
use crate::error::ShlError;

const IV_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    cty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    zip: Option<String>,
}

/// Options for [`encrypt`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptOptions {
    pub enable_compression: bool,
}

fn decode_key(key_b64u: &str) -> Result<Aes256Gcm, ShlError> {
    let key_bytes = URL_SAFE_NO_PAD
        .decode(key_b64u)
        .map_err(|e| ShlError::Decryption(format!("invalid base64url key: {e}")))?;
    if key_bytes.len() != 32 {
        return Err(ShlError::Decryption(format!(
            "A256GCM requires a 256-bit key, got {} bits",
            key_bytes.len() * 8
        )));
    }
    Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| ShlError::Decryption(format!("invalid key: {e}")))
}

/// Encrypts `content` into a compact JWE string (5 dot-separated segments),
/// `alg=dir`, `enc=A256GCM`, per-call random 96-bit IV (§4.G).
pub fn encrypt(content: &[u8], key_b64u: &str, content_type: &str, opts: EncryptOptions) -> Result<String, ShlError> {
    let cipher = decode_key(key_b64u)?;

    let (plaintext, zip) = if opts.enable_compression {
        (
            raw_deflate(content).map_err(|e| ShlError::Decryption(format!("deflate failed: {e}")))?,
            Some("DEF".to_string()),
        )
    } else {
        (content.to_vec(), None)
    };

    let header = JweHeader {
        alg: "dir".to_string(),
        enc: "A256GCM".to_string(),
        cty: content_type.to_string(),
        zip,
    };
    let header_json = serde_json::to_vec(&header)
        .map_err(|e| ShlError::Decryption(format!("header serialization failed: {e}")))?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);

    let mut iv_bytes = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext_and_tag = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| ShlError::Decryption(format!("encryption failed: {e}")))?;
    let tag_len = 16;
    let (ciphertext, tag) = ciphertext_and_tag.split_at(ciphertext_and_tag.len() - tag_len);

    Ok(format!(
        "{header_b64}..{}.{}.{}",
        URL_SAFE_NO_PAD.encode(iv_bytes),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag)
    ))
}

/// Decrypts a compact JWE string, returning `(plaintext, content_type)`.
/// Requires `cty` in the protected header (§4.G).
pub fn decrypt(jwe: &str, key_b64u: &str) -> Result<(Vec<u8>, String), ShlError> {
    let parts: Vec<&str> = jwe.split('.').collect();
    if parts.len() != 5 {
        return Err(ShlError::Decryption(format!(
            "expected 5 compact segments, got {}",
            parts.len()
        )));
    }
    let (header_b64, _encrypted_key, iv_b64, ciphertext_b64, tag_b64) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| ShlError::Decryption(format!("invalid header base64url: {e}")))?;
    let header: JweHeader = serde_json::from_slice(&header_json)
        .map_err(|e| ShlError::Decryption(format!("invalid header JSON: {e}")))?;
    if header.cty.is_empty() {
        return Err(ShlError::Decryption(
            "Missing content type (cty) in JWE protected header".to_string(),
        ));
    }

    let cipher = decode_key(key_b64u)?;

    let iv = URL_SAFE_NO_PAD
        .decode(iv_b64)
        .map_err(|e| ShlError::Decryption(format!("invalid iv base64url: {e}")))?;
    if iv.len() != IV_LEN {
        return Err(ShlError::Decryption(format!("IV must be {IV_LEN} bytes")));
    }
    let nonce = Nonce::from_slice(&iv);

    let mut combined = URL_SAFE_NO_PAD
        .decode(ciphertext_b64)
        .map_err(|e| ShlError::Decryption(format!("invalid ciphertext base64url: {e}")))?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|e| ShlError::Decryption(format!("invalid tag base64url: {e}")))?;
    combined.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|_| ShlError::Decryption("authentication tag verification failed".to_string()))?;

    let plaintext = if header.zip.as_deref() == Some("DEF") {
        raw_inflate(&plaintext).map_err(|e| ShlError::Decryption(format!("inflate failed: {e}")))?
    } else {
        plaintext
    };

    Ok((plaintext, header.cty))
}
