//! Error kinds for every component, kept narrow and non-leaking per component
//! boundary (no single catch-all `CoreError`).

use thiserror::Error;

/// Errors raised validating or QR-optimizing a FHIR Bundle (component A).
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundle validation failed: {0}")]
    Validation(String),

    #[error("reference {reference:?} did not resolve to any entry")]
    InvalidReference { reference: String },
}

/// Errors raised building or validating a Verifiable Credential (component B).
#[derive(Error, Debug)]
pub enum VcError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("verifiable credential validation failed: {0}")]
    Validation(String),
}

/// Errors raised signing or verifying a JWS (component C).
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("payload validation failed: {0}")]
    PayloadValidation(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("credential expired at {exp} (now {now})")]
    Expiration { exp: i64, now: i64 },

    #[error("key error: {0}")]
    Key(String),

    #[error("malformed compact JWS: {0}")]
    Malformed(String),
}

/// Errors raised by the QR numeric codec (component D).
#[derive(Error, Debug)]
pub enum QrError {
    #[error("character {0:?} (ord {1}) is outside the encodable range [45,122]")]
    UnencodableChar(char, u32),

    #[error("digit pair {0} exceeds the maximum encodable value 77")]
    DigitOutOfRange(u8),

    #[error("numeric payload has odd length")]
    OddLength,

    #[error("malformed QR chunk prefix: {0:?}")]
    MalformedPrefix(String),

    #[error("inconsistent declared chunk total: saw both {0} and {1}")]
    InconsistentTotal(u32, u32),

    #[error("chunk index {index} is out of range for total {total}")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("missing chunk index {0} of {1}")]
    MissingChunk(u32, u32),

    #[error("empty payload")]
    EmptyPayload,
}

/// Errors raised parsing or serializing the SHC file wrapper (component E).
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("does not contain expected verifiableCredential array")]
    MissingArray,

    #[error("File contains empty verifiableCredential array")]
    EmptyArray,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

/// Errors spanning the SHL payload codec, crypto, manifest builder, viewer,
/// and directory client (components F–J), matching the `SHL*` kinds in §7.
#[derive(Error, Debug)]
pub enum ShlError {
    #[error("{0}")]
    Format(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("SHL expired")]
    Expired,

    #[error("{0}")]
    InvalidPasscode(String),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("{0}")]
    Manifest(String),

    #[error("manifest not found")]
    ManifestNotFound,

    #[error("manifest rate limited")]
    ManifestRateLimit,

    #[error("network error: {status} {status_text} for {url}")]
    Network {
        status: u16,
        status_text: String,
        url: String,
    },

    #[error("{0}")]
    Viewer(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl ShlError {
    pub(crate) fn manifest_wrap(err: impl std::fmt::Display) -> Self {
        ShlError::Manifest(format!("Failed to build manifest: {err}"))
    }
}
