//! Demo: issue a SMART Health Card, share it over a SMART Health Link, then
//! resolve the link back to the original FHIR resource.
//!
//! This binary is an external consumer of the library, not part of it: it
//! supplies a concrete `reqwest`-backed `HttpFetch` and an in-memory
//! `FileStorage`, both of which a real issuer/wallet would replace with
//! production implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde_json::json;
use tracing::info;

use smart_health_core::error::ShlError;
use smart_health_core::jws::{self, JwtPayload, SignOptions};
use smart_health_core::keys::KeyMaterial;
use smart_health_core::shl::manifest::{BuildManifestOptions, ManifestBuilder};
use smart_health_core::shl::payload::{self as shl_payload, GenerateOptions};
use smart_health_core::transport::{HttpFetch, HttpResponse};
use smart_health_core::{bundle, vc};

/// Concrete `HttpFetch` a real viewer would use with
/// [`smart_health_core::shl::viewer::resolve`] against a deployed manifest
/// endpoint; unused by this demo, which has no such endpoint to call.
#[allow(dead_code)]
struct ReqwestFetch {
    client: reqwest::Client,
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, ShlError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ShlError::Manifest(format!("GET {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ShlError::Manifest(format!("reading response body failed: {e}")))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse, ShlError> {
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ShlError::Manifest(format!("POST {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ShlError::Manifest(format!("reading response body failed: {e}")))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// An in-process file store, standing in for object storage in production.
struct InMemoryStorage {
    files: Mutex<HashMap<String, String>>,
    next_id: Mutex<u32>,
}

impl InMemoryStorage {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }
}

#[async_trait]
impl smart_health_core::transport::FileStorage for InMemoryStorage {
    async fn upload_file(&self, ciphertext: &str) -> Result<String, ShlError> {
        let mut next_id = self.next_id.lock().unwrap();
        let path = format!("shl-file-{next_id}");
        *next_id += 1;
        self.files.lock().unwrap().insert(path.clone(), ciphertext.to_string());
        Ok(path)
    }

    async fn get_file_url(&self, storage_path: &str) -> Result<String, ShlError> {
        Ok(format!("https://files.example.org/{storage_path}"))
    }

    async fn load_file(&self, storage_path: &str) -> Result<String, ShlError> {
        self.files
            .lock()
            .unwrap()
            .get(storage_path)
            .cloned()
            .ok_or_else(|| ShlError::Manifest("file not found in manifest".to_string()))
    }
}

fn sample_bundle() -> serde_json::Value {
    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            {
                "fullUrl": "resource:0",
                "resource": {
                    "resourceType": "Patient",
                    "id": "123",
                    "name": [{"family": "Anyperson", "given": ["John", "B."]}]
                }
            },
            {
                "fullUrl": "resource:1",
                "resource": {
                    "resourceType": "Immunization",
                    "id": "456",
                    "patient": {"reference": "Patient/123"},
                    "vaccineCode": {"coding": [{"system": "http://hl7.org/fhir/sid/cvx", "code": "207"}]}
                }
            }
        ]
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = VerifyingKey::from(&signing_key);
    let priv_material = KeyMaterial::Raw(signing_key.to_bytes().to_vec());
    let pub_material = KeyMaterial::Raw(verifying_key.to_encoded_point(false).as_bytes().to_vec());
    let pub_material_for_verify = KeyMaterial::Raw(verifying_key.to_encoded_point(false).as_bytes().to_vec());

    let optimized = bundle::optimize(&sample_bundle(), bundle::OptimizeOptions::default())?;
    let credential = vc::create(&optimized, vc::CreateOptions::default())?;

    let payload = JwtPayload {
        iss: "https://issuer.example.org".to_string(),
        nbf: chrono::Utc::now().timestamp(),
        exp: Some(chrono::Utc::now().timestamp() + 365 * 24 * 3600),
        vc: credential,
    };
    let compact_jws = jws::sign(&payload, priv_material, pub_material, SignOptions::default())?;
    info!(segments = compact_jws.split('.').count(), "issued SMART Health Card");

    let storage = InMemoryStorage::new();
    let shl = shl_payload::generate(GenerateOptions {
        base_manifest_url: "https://shl.example.org".to_string(),
        manifest_path: None,
        expiration_date: None,
        flag: Some("L".to_string()),
        label: Some("Demo immunization record".to_string()),
    })?;
    let uri = shl_payload::to_uri(&shl.payload);
    info!(%uri, "generated SHL");

    let mut builder = ManifestBuilder::new(shl.payload.clone(), &storage);
    builder.add_health_card(&compact_jws, true).await?;

    let manifest = builder
        .build_manifest(BuildManifestOptions {
            embedded_length_max: 100_000,
            status: None,
            list: None,
        })
        .await?;
    info!(files = manifest.files.len(), "built manifest document");

    let _verified = jws::verify(&compact_jws, pub_material_for_verify, jws::VerifyOptions::default())?;
    info!("verified health card signature locally");

    // A real viewer would resolve the SHL over the network instead:
    //   let fetch = ReqwestFetch { client: reqwest::Client::new() };
    //   viewer::resolve(&shl.payload, &fetch, None, ResolveOptions { recipient, ..Default::default() }).await?;
    // This demo has no deployed manifest endpoint to POST against, so it
    // stops at the builder stage above.

    Ok(())
}
