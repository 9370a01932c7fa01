//! SHL URI and payload codec (component F, §4.F).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ShlError;

const KEY_LEN: usize = 32;
const LABEL_MAX: usize = 80;
const VALID_FLAGS: [&str; 5] = ["L", "P", "LP", "U", "LU"];

/// The wire payload encoded into a `shlink:/` URI (§3 "SHL core").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShlPayload {
    pub url: String,
    pub key: String,
    pub v: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ShlPayload {
    pub fn requires_passcode(&self) -> bool {
        self.flag.as_deref().is_some_and(|f| f.contains('P'))
    }

    pub fn is_long_term(&self) -> bool {
        self.flag.as_deref().is_some_and(|f| f.contains('L'))
    }

    pub fn is_direct_file(&self) -> bool {
        self.flag.as_deref().is_some_and(|f| f.contains('U'))
    }
}

/// A generated SHL: the payload plus the manifest-URL entropy segment used
/// to derive `manifestId` (§4.H).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shl {
    pub payload: ShlPayload,
}

/// Options for [`generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub base_manifest_url: String,
    pub manifest_path: Option<String>,
    pub expiration_date: Option<i64>,
    pub flag: Option<String>,
    pub label: Option<String>,
}

fn random_b64u(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn trim_slashes(s: &str) -> &str {
    s.trim_matches('/')
}

/// Generates a fresh SHL with cryptographically random manifest-URL entropy
/// and symmetric key (§4.F).
pub fn generate(opts: GenerateOptions) -> Result<Shl, ShlError> {
    if let Some(flag) = &opts.flag {
        if !VALID_FLAGS.contains(&flag.as_str()) {
            return Err(ShlError::Format(format!("invalid flag {flag:?}")));
        }
    }
    if let Some(label) = &opts.label {
        if label.chars().count() > LABEL_MAX {
            return Err(ShlError::Format(format!(
                "label exceeds {LABEL_MAX} characters"
            )));
        }
    }

    let entropy = random_b64u(KEY_LEN);
    let key = random_b64u(KEY_LEN);

    let base = trim_slashes(&opts.base_manifest_url);
    let mut url = format!("{base}/{entropy}");
    if let Some(path) = &opts.manifest_path {
        let path = trim_slashes(path);
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
    }

    Ok(Shl {
        payload: ShlPayload {
            url,
            key,
            v: 1,
            exp: opts.expiration_date,
            flag: opts.flag,
            label: opts.label,
        },
    })
}

/// Serializes a payload into a bare `shlink:/...` URI (§4.F).
pub fn to_uri(payload: &ShlPayload) -> String {
    let json = serde_json::to_vec(payload).expect("ShlPayload always serializes");
    format!("shlink:/{}", URL_SAFE_NO_PAD.encode(json))
}

/// Serializes a payload with a viewer-URL prefix: `{viewer_base}#shlink:/...`.
pub fn to_viewer_uri(payload: &ShlPayload, viewer_base: &str) -> String {
    format!("{}#{}", viewer_base.trim_end_matches('/'), to_uri(payload))
}

fn validate_payload(payload: &ShlPayload) -> Result<(), ShlError> {
    if payload.url.is_empty() || Url::parse(&payload.url).is_err() {
        return Err(ShlError::Format("url must be a valid absolute URL".to_string()));
    }
    if payload.key.chars().count() != 43 {
        return Err(ShlError::Format("key must be exactly 43 characters".to_string()));
    }
    if let Some(exp) = payload.exp {
        if exp <= 0 {
            return Err(ShlError::Format("exp must be a positive number".to_string()));
        }
    }
    if let Some(flag) = &payload.flag {
        if !VALID_FLAGS.contains(&flag.as_str()) {
            return Err(ShlError::Format(format!("invalid flag {flag:?}")));
        }
    }
    if let Some(label) = &payload.label {
        if label.chars().count() > LABEL_MAX {
            return Err(ShlError::Format(format!(
                "label exceeds {LABEL_MAX} characters"
            )));
        }
    }
    if payload.v != 1 {
        return Err(ShlError::Format("v must equal 1".to_string()));
    }
    Ok(())
}

/// Parses a `shlink:/...` URI, accepting both the bare and viewer-prefixed
/// (`...#shlink:/...`) forms (§4.F).
pub fn parse(uri: &str) -> Result<ShlPayload, ShlError> {
    let shlink_part = uri
        .rsplit_once("#shlink:/")
        .map(|(_, rest)| format!("shlink:/{rest}"))
        .unwrap_or_else(|| uri.to_string());

    let b64 = shlink_part
        .strip_prefix("shlink:/")
        .ok_or_else(|| ShlError::Format("missing shlink:/ prefix".to_string()))?;

    let json = URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|e| ShlError::Format(format!("invalid base64url payload: {e}")))?;
    let payload: ShlPayload =
        serde_json::from_slice(&json).map_err(|e| ShlError::Format(format!("invalid payload JSON: {e}")))?;

    validate_payload(&payload)?;
    Ok(payload)
}
