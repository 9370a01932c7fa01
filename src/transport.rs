//! Injected I/O boundaries.
//!
//! The core performs no I/O of its own (spec §1, §5): every HTTP call and
//! every storage operation is a trait the host application implements. This
//! keeps the crate runtime-agnostic and lets issuers/wallets plug in
//! whatever storage or HTTP stack they already use.

use async_trait::async_trait;

use crate::error::ShlError;

/// A minimal HTTP response, transport-agnostic.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Result<String, ShlError> {
        String::from_utf8(self.body.clone())
            .map_err(|e| ShlError::Manifest(format!("Invalid manifest response: {e}")))
    }
}

/// Injected HTTP client. Implementations are free to wrap `reqwest`,
/// `hyper`, a mock, or anything else; the crate only needs GET and POST of
/// JSON bodies, matching the manifest endpoint contract in §6.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, ShlError>;

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse, ShlError>;
}

/// Maps an HTTP status code returned while resolving an SHLink to the
/// appropriate `ShlError` kind, per §4.I step 5 / §7.
pub fn map_http_status(status: u16, status_text: &str, url: &str) -> ShlError {
    match status {
        401 => ShlError::InvalidPasscode("Invalid or missing passcode".to_string()),
        404 => ShlError::ManifestNotFound,
        429 => ShlError::ManifestRateLimit,
        _ => ShlError::Network {
            status,
            status_text: status_text.to_string(),
            url: url.to_string(),
        },
    }
}

/// Storage callbacks owned by a `ManifestBuilder` (§4.H).
///
/// `load_file` has no required default: JS's "defaults to fetching
/// `getFileURL` via injected `fetch`" is modeled as the free function
/// [`fetch_via_url`] below, which an implementation can delegate to when it
/// has an `HttpFetch` handy. `remove_file` and `update_file` are optional in
/// the spec; the default implementations here return
/// `ShlError::Unsupported`, matching "require a callback" failures.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn upload_file(&self, ciphertext: &str) -> Result<String, ShlError>;

    async fn get_file_url(&self, storage_path: &str) -> Result<String, ShlError>;

    async fn load_file(&self, storage_path: &str) -> Result<String, ShlError>;

    async fn remove_file(&self, _storage_path: &str) -> Result<(), ShlError> {
        Err(ShlError::Unsupported(
            "removeFile callback not configured".to_string(),
        ))
    }

    async fn update_file(&self, _storage_path: &str, _ciphertext: &str) -> Result<(), ShlError> {
        Err(ShlError::Unsupported(
            "updateFile callback not configured".to_string(),
        ))
    }
}

/// Default `loadFile` behavior (§4.H): resolve a short-lived URL then GET
/// it, mapping HTTP failures to `ShlError::Network`.
pub async fn fetch_via_url(fetch: &dyn HttpFetch, url: &str) -> Result<String, ShlError> {
    let resp = fetch.get(url).await?;
    if !resp.is_success() {
        return Err(map_http_status(resp.status, "", url));
    }
    resp.text()
}
