//! SHL manifest builder: in-memory file registry, per-request manifest
//! assembly (component H, §4.H).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ShlError;
use crate::shc_file;
use crate::shl::crypto::{self, EncryptOptions};
use crate::shl::payload::ShlPayload;
use crate::transport::{fetch_via_url, FileStorage, HttpFetch};

pub const HEALTH_CARD_CONTENT_TYPE: &str = "application/smart-health-card";
pub const FHIR_RESOURCE_CONTENT_TYPE: &str = "application/fhir+json";

/// Per-file bookkeeping the builder keeps for its owned files (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "storagePath")]
    pub storage_path: String,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(rename = "ciphertextLength")]
    pub ciphertext_length: usize,
    #[serde(rename = "lastUpdated")]
    pub last_updated: chrono::DateTime<Utc>,
}

/// One entry of a rebuilt manifest document (§3 "Manifest document").
#[derive(Debug, Clone, Serialize)]
pub struct ManifestFileEntry {
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// The rebuilt manifest document returned by [`ManifestBuilder::build_manifest`].
#[derive(Debug, Clone, Serialize)]
pub struct ManifestDocument {
    pub files: Vec<ManifestFileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<serde_json::Value>,
}

/// Options for [`ManifestBuilder::build_manifest`].
#[derive(Debug, Clone, Default)]
pub struct BuildManifestOptions {
    pub embedded_length_max: usize,
    pub status: Option<String>,
    pub list: Option<serde_json::Value>,
}

/// Input shape accepted by `addHealthCard`/`updateHealthCard` (§4.H): either
/// a single raw JWS, wrapped into a one-element `verifiableCredential`
/// array, or an already-assembled multi-credential SHC file serialized
/// as-is.
#[derive(Debug, Clone)]
pub enum HealthCardInput {
    Jws(String),
    Shc(Vec<String>),
}

impl HealthCardInput {
    fn into_file_json(self) -> String {
        match self {
            HealthCardInput::Jws(jws) => shc_file::serialize(std::slice::from_ref(&jws)),
            HealthCardInput::Shc(jws_list) => shc_file::serialize(&jws_list),
        }
    }
}

impl From<&str> for HealthCardInput {
    fn from(jws: &str) -> Self {
        HealthCardInput::Jws(jws.to_string())
    }
}

impl From<String> for HealthCardInput {
    fn from(jws: String) -> Self {
        HealthCardInput::Jws(jws)
    }
}

impl From<&String> for HealthCardInput {
    fn from(jws: &String) -> Self {
        HealthCardInput::Jws(jws.clone())
    }
}

impl From<Vec<String>> for HealthCardInput {
    fn from(jws_list: Vec<String>) -> Self {
        HealthCardInput::Shc(jws_list)
    }
}

/// A lossless snapshot of builder state for persistence (§4.H `toDBAttrs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestBuilderSnapshot {
    pub shl: ShlPayload,
    pub files: Vec<FileRecord>,
}

/// In-memory registry of SHL files plus injected storage/fetch callbacks
/// (§4.H). Owns its file list exclusively.
pub struct ManifestBuilder<'a> {
    shl: ShlPayload,
    files: Vec<FileRecord>,
    storage: &'a dyn FileStorage,
    fetch: Option<&'a dyn HttpFetch>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(shl: ShlPayload, storage: &'a dyn FileStorage) -> Self {
        Self {
            shl,
            files: Vec::new(),
            storage,
            fetch: None,
        }
    }

    /// Attaches an `HttpFetch` used by the default `load_file` behavior
    /// (§4.H: "loadFile defaults to fetching getFileURL via injected fetch").
    pub fn with_fetch(mut self, fetch: &'a dyn HttpFetch) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn shl(&self) -> &ShlPayload {
        &self.shl
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    async fn upload_and_record(&mut self, ciphertext: String, content_type: &str) -> Result<String, ShlError> {
        let storage_path = self.storage.upload_file(&ciphertext).await?;
        self.files.push(FileRecord {
            storage_path: storage_path.clone(),
            content_type: content_type.to_string(),
            ciphertext_length: ciphertext.len(),
            last_updated: Utc::now(),
        });
        Ok(storage_path)
    }

    /// Wraps a health card into the SHC file format, encrypts it, uploads
    /// it, and records its metadata (§4.H `addHealthCard`). Accepts either a
    /// single raw JWS (`&str`/`String`, wrapped into a one-element array)
    /// or an already-assembled multi-credential `Vec<String>`.
    pub async fn add_health_card(
        &mut self,
        health_card: impl Into<HealthCardInput>,
        enable_compression: bool,
    ) -> Result<String, ShlError> {
        let file_json = health_card.into().into_file_json();
        let opts = EncryptOptions { enable_compression };
        let jwe = crypto::encrypt(file_json.as_bytes(), &self.shl.key, HEALTH_CARD_CONTENT_TYPE, opts)?;
        self.upload_and_record(jwe, HEALTH_CARD_CONTENT_TYPE).await
    }

    /// Encrypts and uploads a FHIR resource (§4.H `addFHIRResource`).
    pub async fn add_fhir_resource(
        &mut self,
        content: &serde_json::Value,
        enable_compression: bool,
    ) -> Result<String, ShlError> {
        let content_json =
            serde_json::to_vec(content).map_err(|e| ShlError::manifest_wrap(format!("invalid FHIR resource: {e}")))?;
        let opts = EncryptOptions { enable_compression };
        let jwe = crypto::encrypt(&content_json, &self.shl.key, FHIR_RESOURCE_CONTENT_TYPE, opts)?;
        self.upload_and_record(jwe, FHIR_RESOURCE_CONTENT_TYPE).await
    }

    fn record_index(&self, storage_path: &str) -> Result<usize, ShlError> {
        self.files
            .iter()
            .position(|f| f.storage_path == storage_path)
            .ok_or_else(|| ShlError::Manifest("file not found in manifest".to_string()))
    }

    async fn update_record(
        &mut self,
        storage_path: &str,
        expected_content_type: &str,
        plaintext: &[u8],
        enable_compression: bool,
    ) -> Result<(), ShlError> {
        let idx = self.record_index(storage_path)?;
        if self.files[idx].content_type != expected_content_type {
            return Err(ShlError::Manifest(format!(
                "file {storage_path} has type {} not {expected_content_type}",
                self.files[idx].content_type
            )));
        }
        let opts = EncryptOptions { enable_compression };
        let jwe = crypto::encrypt(plaintext, &self.shl.key, expected_content_type, opts)?;
        self.storage.update_file(storage_path, &jwe).await?;
        self.files[idx].ciphertext_length = jwe.len();
        self.files[idx].last_updated = Utc::now();
        Ok(())
    }

    /// Re-encrypts the health card at `storage_path` with a new JWS or SHC
    /// bundle (§4.H `updateHealthCard`); accepts the same input shapes as
    /// [`add_health_card`](Self::add_health_card).
    pub async fn update_health_card(
        &mut self,
        storage_path: &str,
        health_card: impl Into<HealthCardInput>,
        enable_compression: bool,
    ) -> Result<(), ShlError> {
        let file_json = health_card.into().into_file_json();
        self.update_record(storage_path, HEALTH_CARD_CONTENT_TYPE, file_json.as_bytes(), enable_compression)
            .await
    }

    /// Re-encrypts the FHIR resource at `storage_path` (§4.H `updateFHIRResource`).
    pub async fn update_fhir_resource(
        &mut self,
        storage_path: &str,
        content: &serde_json::Value,
        enable_compression: bool,
    ) -> Result<(), ShlError> {
        let content_json =
            serde_json::to_vec(content).map_err(|e| ShlError::manifest_wrap(format!("invalid FHIR resource: {e}")))?;
        self.update_record(storage_path, FHIR_RESOURCE_CONTENT_TYPE, &content_json, enable_compression)
            .await
    }

    /// Removes a file from the builder, requiring the `remove_file` callback
    /// (§4.H `removeFile`).
    pub async fn remove_file(&mut self, storage_path: &str) -> Result<(), ShlError> {
        let idx = self.record_index(storage_path)?;
        self.storage.remove_file(storage_path).await?;
        self.files.remove(idx);
        Ok(())
    }

    /// Looks up a file record by storage path (§4.H `findFile`).
    pub fn find_file(&self, storage_path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.storage_path == storage_path)
    }

    async fn load_file(&self, storage_path: &str) -> Result<String, ShlError> {
        match self.storage.load_file(storage_path).await {
            Err(ShlError::Unsupported(_)) => {
                let fetch = self.fetch.ok_or_else(|| {
                    ShlError::Manifest("no loadFile callback and no fetch configured".to_string())
                })?;
                let url = self.storage.get_file_url(storage_path).await?;
                fetch_via_url(fetch, &url).await
            }
            other => other,
        }
    }

    /// Rebuilds the manifest document fresh from current file state (§4.H
    /// `buildManifest`). Manifests are never cached.
    pub async fn build_manifest(&self, opts: BuildManifestOptions) -> Result<ManifestDocument, ShlError> {
        if let Some(exp) = self.shl.exp {
            if exp <= Utc::now().timestamp() {
                return Err(ShlError::Expired);
            }
        }

        let mut entries = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let ciphertext = self.load_file(&file.storage_path).await?;
            let entry = if ciphertext.len() <= opts.embedded_length_max {
                ManifestFileEntry {
                    content_type: file.content_type.clone(),
                    embedded: Some(ciphertext),
                    location: None,
                }
            } else {
                let url = self.storage.get_file_url(&file.storage_path).await?;
                ManifestFileEntry {
                    content_type: file.content_type.clone(),
                    embedded: None,
                    location: Some(url),
                }
            };
            entries.push(entry);
        }

        Ok(ManifestDocument {
            files: entries,
            status: opts.status,
            list: opts.list,
        })
    }

    /// Derives the manifest id: the non-empty path segment immediately
    /// before any trailing file name, validated as 43 `[A-Za-z0-9_-]`
    /// characters (§4.H `manifestId`).
    pub fn manifest_id(&self) -> Result<String, ShlError> {
        manifest_id(&self.shl.url)
    }

    /// Snapshots state for persistence (§4.H `toDBAttrs`).
    pub fn to_db_attrs(&self) -> ManifestBuilderSnapshot {
        ManifestBuilderSnapshot {
            shl: self.shl.clone(),
            files: self.files.clone(),
        }
    }

    /// Restores a builder from a snapshot plus fresh callbacks (§4.H
    /// `fromDBAttrs`).
    pub fn from_db_attrs(snapshot: ManifestBuilderSnapshot, storage: &'a dyn FileStorage) -> Self {
        Self {
            shl: snapshot.shl,
            files: snapshot.files,
            storage,
            fetch: None,
        }
    }
}

/// Standalone `manifestId` derivation (§4.H), usable without a builder
/// instance — e.g. by a server routing inbound manifest requests.
pub fn manifest_id(shl_url: &str) -> Result<String, ShlError> {
    let without_scheme = shl_url.splitn(2, "://").nth(1).unwrap_or(shl_url);
    let path_start = without_scheme.find('/').map(|i| i + 1).unwrap_or(without_scheme.len());
    let path = &without_scheme[path_start..];

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let entropy = segments
        .first()
        .ok_or_else(|| ShlError::Format("SHL url has no entropy segment".to_string()))?;

    if entropy.chars().count() != 43
        || !entropy.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ShlError::Format(
            "entropy segment must be 43 characters of [A-Za-z0-9_-]".to_string(),
        ));
    }
    Ok(entropy.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MemStorage {
        files: Mutex<std::collections::HashMap<String, String>>,
        next_id: AtomicU32,
        url_calls: AtomicU32,
    }

    impl MemStorage {
        fn new() -> Self {
            Self {
                files: Mutex::new(std::collections::HashMap::new()),
                next_id: AtomicU32::new(0),
                url_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FileStorage for MemStorage {
        async fn upload_file(&self, ciphertext: &str) -> Result<String, ShlError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let path = format!("file-{id}");
            self.files.lock().unwrap().insert(path.clone(), ciphertext.to_string());
            Ok(path)
        }

        async fn get_file_url(&self, storage_path: &str) -> Result<String, ShlError> {
            self.url_calls.fetch_add(1, Ordering::SeqCst);
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

    fn test_shl() -> ShlPayload {
        ShlPayload {
            url: "https://shl.example.org/abcdefghijklmnopqrstuvwxyz0123456789ABCDEF".to_string(),
            key: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([7u8; 32]),
            v: 1,
            exp: None,
            flag: Some("L".to_string()),
            label: None,
        }
    }

    #[tokio::test]
    async fn scenario_e_embedded_vs_location_threshold() {
        let storage = MemStorage::new();
        let mut builder = ManifestBuilder::new(test_shl(), &storage);
        let resource = json!({"resourceType": "Patient", "id": "123"});
        builder.add_fhir_resource(&resource, false).await.unwrap();

        let embedded = builder
            .build_manifest(BuildManifestOptions {
                embedded_length_max: 50_000,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(embedded.files[0].embedded.is_some());

        let located = builder
            .build_manifest(BuildManifestOptions {
                embedded_length_max: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(located.files[0].location.as_deref().unwrap().starts_with("https://files.example.org/file-"));
    }

    #[tokio::test]
    async fn property_6_manifest_locations_are_refreshed_each_call() {
        let storage = MemStorage::new();
        let mut builder = ManifestBuilder::new(test_shl(), &storage);
        builder
            .add_fhir_resource(&json!({"resourceType": "Patient"}), false)
            .await
            .unwrap();

        let opts = BuildManifestOptions {
            embedded_length_max: 0,
            ..Default::default()
        };
        let first = builder.build_manifest(opts.clone()).await.unwrap();
        assert_eq!(storage.url_calls.load(Ordering::SeqCst), 1);
        let _second = builder.build_manifest(opts).await.unwrap();
        assert_eq!(storage.url_calls.load(Ordering::SeqCst), 2);
        assert!(first.files[0].location.is_some());
    }

    #[tokio::test]
    async fn build_manifest_rejects_expired_shl_without_network() {
        let storage = MemStorage::new();
        let mut shl = test_shl();
        shl.exp = Some(1);
        let mut builder = ManifestBuilder::new(shl, &storage);
        builder
            .add_fhir_resource(&json!({"resourceType": "Patient"}), false)
            .await
            .unwrap();
        let result = builder
            .build_manifest(BuildManifestOptions {
                embedded_length_max: 0,
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ShlError::Expired)));
    }

    #[tokio::test]
    async fn update_health_card_rejects_type_mismatch() {
        let storage = MemStorage::new();
        let mut builder = ManifestBuilder::new(test_shl(), &storage);
        let path = builder
            .add_fhir_resource(&json!({"resourceType": "Patient"}), false)
            .await
            .unwrap();
        let result = builder.update_health_card(&path, "a.b.c", false).await;
        assert!(matches!(result, Err(ShlError::Manifest(_))));
    }

    #[tokio::test]
    async fn add_health_card_accepts_a_multi_credential_shc_bundle() {
        let storage = MemStorage::new();
        let mut builder = ManifestBuilder::new(test_shl(), &storage);
        let jws_list = vec!["a.b.c".to_string(), "d.e.f".to_string()];
        let path = builder.add_health_card(jws_list.clone(), false).await.unwrap();

        let stored = storage.files.lock().unwrap().get(&path).cloned().unwrap();
        let (plaintext, content_type) = crypto::decrypt(&stored, &test_shl().key).unwrap();
        assert_eq!(content_type, HEALTH_CARD_CONTENT_TYPE);
        let plaintext = String::from_utf8(plaintext).unwrap();
        assert_eq!(shc_file::parse(&plaintext).unwrap(), jws_list);
    }

    #[test]
    fn manifest_id_extracts_entropy_segment() {
        let shl = test_shl();
        let id = manifest_id(&shl.url).unwrap();
        assert_eq!(id.len(), 43);
    }

    #[test]
    fn manifest_id_rejects_wrong_length() {
        assert!(manifest_id("https://shl.example.org/short").is_err());
    }
}
