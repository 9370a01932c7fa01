//! SHL viewer/resolver: parses a URI, fetches and decrypts the manifest
//! files, verifies nested SHCs (component I, §4.I).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ShlError;
use crate::jws::{self, JwtPayload};
use crate::keys::KeyMaterial;
use crate::shc_file;
use crate::shl::crypto;
use crate::shl::manifest::{FHIR_RESOURCE_CONTENT_TYPE, HEALTH_CARD_CONTENT_TYPE};
use crate::shl::payload::ShlPayload;
use crate::transport::{map_http_status, HttpFetch};

/// Options for [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub recipient: String,
    pub passcode: Option<String>,
    pub embedded_length_max: Option<u64>,
}

/// Resolves a signer's public key for a given `iss`/`kid` pair so a fetched
/// SHC can be verified; typically backed by [`crate::directory`].
pub trait ShcReader: Send + Sync {
    fn resolve_key(&self, iss: &str, kid: &str) -> Option<KeyMaterial>;
}

/// Result of [`resolve`] (§4.I step 9).
#[derive(Debug, Clone)]
pub struct ResolvedShl {
    pub manifest: Option<ManifestResponse>,
    pub smart_health_cards: Vec<JwtPayload>,
    pub fhir_resources: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestFileDescriptor {
    #[serde(rename = "contentType")]
    content_type: String,
    embedded: Option<String>,
    location: Option<String>,
}

/// The manifest document as received from the network (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestResponse {
    files: Vec<ManifestFileDescriptor>,
    pub status: Option<String>,
    pub list: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct ManifestRequest {
    recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    passcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "embeddedLengthMax")]
    embedded_length_max: Option<u64>,
}

const SUPPORTED_CONTENT_TYPES: [&str; 2] = [HEALTH_CARD_CONTENT_TYPE, FHIR_RESOURCE_CONTENT_TYPE];

/// Resolves a parsed SHL to its contained SMART Health Cards and FHIR
/// resources (§4.I). `fetch` is required unless the caller already has the
/// ciphertext some other way.
pub async fn resolve(
    shl: &ShlPayload,
    fetch: &dyn HttpFetch,
    reader: Option<&dyn ShcReader>,
    opts: ResolveOptions,
) -> Result<ResolvedShl, ShlError> {
    if opts.recipient.trim().is_empty() {
        return Err(ShlError::Viewer("recipient must not be empty".to_string()));
    }
    if let Some(exp) = shl.exp {
        if exp <= chrono::Utc::now().timestamp() {
            return Err(ShlError::Expired);
        }
    }
    if shl.requires_passcode() && opts.passcode.is_none() {
        return Err(ShlError::InvalidPasscode("SHL requires a passcode".to_string()));
    }

    if shl.is_direct_file() {
        let resp = fetch.get(&shl.url).await?;
        if !resp.is_success() {
            return Err(map_http_status(resp.status, "", &shl.url));
        }
        let jwe = resp.text()?;
        let (plaintext, content_type) = crypto::decrypt(&jwe, &shl.key)?;
        let mut result = ResolvedShl {
            manifest: None,
            smart_health_cards: Vec::new(),
            fhir_resources: Vec::new(),
        };
        dispatch_content(&plaintext, &content_type, reader, &mut result)?;
        return Ok(result);
    }

    let body = serde_json::to_value(ManifestRequest {
        recipient: opts.recipient,
        passcode: opts.passcode,
        embedded_length_max: opts.embedded_length_max,
    })
    .expect("ManifestRequest always serializes");

    let resp = fetch.post_json(&shl.url, body).await?;
    if !resp.is_success() {
        return Err(map_http_status(resp.status, "", &shl.url));
    }

    let text = resp.text()?;
    let manifest: ManifestResponse = serde_json::from_str(&text)
        .map_err(|_| ShlError::Manifest("Invalid manifest response: not valid JSON".to_string()))?;

    for descriptor in &manifest.files {
        if !SUPPORTED_CONTENT_TYPES.contains(&descriptor.content_type.as_str()) {
            return Err(ShlError::InvalidContent(format!(
                "unsupported manifest content type {:?}",
                descriptor.content_type
            )));
        }
        match (&descriptor.embedded, &descriptor.location) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(ShlError::Manifest(
                    "each manifest file must have exactly one of embedded/location".to_string(),
                ))
            }
        }
        if let Some(location) = &descriptor.location {
            if url::Url::parse(location).is_err() {
                return Err(ShlError::Manifest(format!("invalid location URL: {location}")));
            }
        }
    }

    let mut result = ResolvedShl {
        manifest: Some(manifest.clone()),
        smart_health_cards: Vec::new(),
        fhir_resources: Vec::new(),
    };

    for descriptor in &manifest.files {
        let ciphertext = match (&descriptor.embedded, &descriptor.location) {
            (Some(jwe), _) => jwe.clone(),
            (None, Some(location)) => {
                let resp = fetch.get(location).await?;
                if !resp.is_success() {
                    return Err(map_http_status(resp.status, "", location));
                }
                resp.text()?
            }
            _ => unreachable!("validated above"),
        };

        let (plaintext, jwe_cty) = crypto::decrypt(&ciphertext, &shl.key)?;
        if jwe_cty != descriptor.content_type {
            return Err(ShlError::Manifest("Content type mismatch".to_string()));
        }
        dispatch_content(&plaintext, &jwe_cty, reader, &mut result)?;
    }

    Ok(result)
}

fn dispatch_content(
    plaintext: &[u8],
    content_type: &str,
    reader: Option<&dyn ShcReader>,
    result: &mut ResolvedShl,
) -> Result<(), ShlError> {
    match content_type {
        HEALTH_CARD_CONTENT_TYPE => {
            let text = std::str::from_utf8(plaintext)
                .map_err(|e| ShlError::InvalidContent(format!("health card payload is not UTF-8: {e}")))?;
            let jws_list = shc_file::parse(text).map_err(|e| ShlError::InvalidContent(e.to_string()))?;
            for jws_str in jws_list {
                let header = jws::peek_header(&jws_str).map_err(|e| ShlError::InvalidContent(e.to_string()))?;
                let payload = jws::peek_payload_unverified(&jws_str).map_err(|e| ShlError::InvalidContent(e.to_string()))?;
                let iss = payload
                    .get("iss")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ShlError::InvalidContent("SHC payload missing iss".to_string()))?;
                let key = reader
                    .and_then(|r| r.resolve_key(iss, &header.kid))
                    .ok_or_else(|| ShlError::InvalidContent("no key available to verify SHC".to_string()))?;
                let verified = jws::verify(&jws_str, key, crate::jws::VerifyOptions::default())
                    .map_err(|e| ShlError::InvalidContent(e.to_string()))?;
                result.smart_health_cards.push(verified);
            }
            Ok(())
        }
        FHIR_RESOURCE_CONTENT_TYPE => {
            let value: Value = serde_json::from_slice(plaintext)
                .map_err(|e| ShlError::InvalidContent(format!("invalid FHIR JSON: {e}")))?;
            if value.get("resourceType").and_then(|v| v.as_str()).is_none() {
                return Err(ShlError::InvalidContent(
                    "FHIR resource missing resourceType".to_string(),
                ));
            }
            result.fhir_resources.push(value);
            Ok(())
        }
        other => Err(ShlError::InvalidContent(format!("unrecognized content type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shl::crypto::EncryptOptions;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockFetch {
        manifest_body: Value,
        post_calls: AtomicU32,
    }

    #[async_trait]
    impl HttpFetch for MockFetch {
        async fn get(&self, _url: &str) -> Result<crate::transport::HttpResponse, ShlError> {
            unreachable!("not used in this scenario")
        }

        async fn post_json(&self, _url: &str, _body: Value) -> Result<crate::transport::HttpResponse, ShlError> {
            self.post_calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::transport::HttpResponse {
                status: 200,
                body: serde_json::to_vec(&self.manifest_body).unwrap(),
            })
        }
    }

    fn test_shl(flag: Option<&str>) -> ShlPayload {
        ShlPayload {
            url: "https://shl.example.org/manifest".to_string(),
            key: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([9u8; 32]),
            v: 1,
            exp: None,
            flag: flag.map(|s| s.to_string()),
            label: None,
        }
    }

    #[tokio::test]
    async fn scenario_f_viewer_happy_path_returns_one_fhir_resource() {
        let shl = test_shl(Some("L"));
        let resource = json!({"resourceType": "Bundle", "type": "collection", "entry": []});
        let jwe = crypto::encrypt(
            serde_json::to_vec(&resource).unwrap().as_slice(),
            &shl.key,
            FHIR_RESOURCE_CONTENT_TYPE,
            EncryptOptions::default(),
        )
        .unwrap();
        let manifest_body = json!({
            "files": [ { "contentType": FHIR_RESOURCE_CONTENT_TYPE, "embedded": jwe } ]
        });
        let fetch = MockFetch {
            manifest_body,
            post_calls: AtomicU32::new(0),
        };

        let result = resolve(
            &shl,
            &fetch,
            None,
            ResolveOptions {
                recipient: "Dr. Example".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.fhir_resources.len(), 1);
        assert_eq!(result.fhir_resources[0], resource);
        assert_eq!(fetch.post_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_g_viewer_requires_passcode_before_any_network_call() {
        let shl = test_shl(Some("P"));
        let fetch = MockFetch {
            manifest_body: json!({"files": []}),
            post_calls: AtomicU32::new(0),
        };
        let result = resolve(
            &shl,
            &fetch,
            None,
            ResolveOptions {
                recipient: "Dr. Example".to_string(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(ShlError::InvalidPasscode(_))));
        assert_eq!(fetch.post_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_empty_recipient() {
        let shl = test_shl(None);
        let fetch = MockFetch {
            manifest_body: json!({"files": []}),
            post_calls: AtomicU32::new(0),
        };
        let result = resolve(
            &shl,
            &fetch,
            None,
            ResolveOptions {
                recipient: "   ".to_string(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(ShlError::Viewer(_))));
    }
}
