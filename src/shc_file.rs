//! The `.smart-health-card` file wrapper (component E, §4.E).
//!
//! MIME type `application/smart-health-card`: a JSON object carrying one or
//! more compact JWS strings under `verifiableCredential`.

use serde::{Deserialize, Serialize};

use crate::error::FileFormatError;

pub const MIME_TYPE: &str = "application/smart-health-card";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShcFile {
    #[serde(rename = "verifiableCredential")]
    pub verifiable_credential: Vec<String>,
}

/// Wraps one or more compact JWS strings into the file format (§4.E `serialize`).
pub fn serialize(jws_list: &[String]) -> String {
    let file = ShcFile {
        verifiable_credential: jws_list.to_vec(),
    };
    serde_json::to_string(&file).expect("ShcFile has no non-serializable fields")
}

/// Parses and validates a `.smart-health-card` file (§4.E `parse`).
pub fn parse(contents: &str) -> Result<Vec<String>, FileFormatError> {
    let value: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| FileFormatError::InvalidJson(e.to_string()))?;

    let array = value
        .get("verifiableCredential")
        .and_then(|v| v.as_array())
        .ok_or(FileFormatError::MissingArray)?;

    if array.is_empty() {
        return Err(FileFormatError::EmptyArray);
    }

    array
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| FileFormatError::InvalidJson("verifiableCredential entries must be strings".to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_credential() {
        let jws_list = vec!["header.payload.signature".to_string()];
        let file = serialize(&jws_list);
        assert_eq!(parse(&file).unwrap(), jws_list);
    }

    #[test]
    fn round_trips_multiple_credentials() {
        let jws_list = vec!["a.b.c".to_string(), "d.e.f".to_string()];
        let file = serialize(&jws_list);
        assert_eq!(parse(&file).unwrap(), jws_list);
    }

    #[test]
    fn rejects_missing_array() {
        let err = parse(r#"{"foo":"bar"}"#).unwrap_err();
        assert!(matches!(err, FileFormatError::MissingArray));
    }

    #[test]
    fn rejects_empty_array() {
        let err = parse(r#"{"verifiableCredential":[]}"#).unwrap_err();
        assert!(matches!(err, FileFormatError::EmptyArray));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(parse("not json"), Err(FileFormatError::InvalidJson(_))));
    }
}
