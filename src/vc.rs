//! W3C Verifiable Credential envelope around a FHIR Bundle (component B, §4.B).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bundle;
use crate::error::VcError;

/// The SMART Health Cards health-card VC type URI, always first in `vc.type`.
pub const HEALTH_CARD_TYPE: &str = "https://smarthealth.cards#health-card";

const FHIR_VERSION_DEFAULT: &str = "4.0.1";

/// `vc.credentialSubject` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSubject {
    #[serde(rename = "fhirVersion")]
    pub fhir_version: String,
    #[serde(rename = "fhirBundle")]
    pub fhir_bundle: Value,
}

/// `vc` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vc {
    #[serde(rename = "type")]
    pub types: Vec<String>,
    #[serde(rename = "credentialSubject")]
    pub credential_subject: CredentialSubject,
}

/// Options for [`create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub fhir_version: String,
    pub include_additional_types: Vec<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            fhir_version: FHIR_VERSION_DEFAULT.to_string(),
            include_additional_types: Vec::new(),
        }
    }
}

/// Builds a `vc` envelope wrapping `bundle`, per §4.B.
pub fn create(bundle: &Value, opts: CreateOptions) -> Result<Vc, VcError> {
    crate::bundle::validate(bundle)?;

    let mut types = vec![HEALTH_CARD_TYPE.to_string()];
    types.extend(opts.include_additional_types);

    Ok(Vc {
        types,
        credential_subject: CredentialSubject {
            fhir_version: opts.fhir_version,
            fhir_bundle: bundle.clone(),
        },
    })
}

/// Re-validates the invariants of an existing `Vc` (§4.B `validate`).
pub fn validate(vc: &Vc) -> Result<(), VcError> {
    if vc.types.is_empty() {
        return Err(VcError::Validation("vc.type must be non-empty".to_string()));
    }
    if !vc.types.iter().any(|t| t == HEALTH_CARD_TYPE) {
        return Err(VcError::Validation(format!(
            "vc.type must contain {HEALTH_CARD_TYPE}"
        )));
    }
    if !is_semver(&vc.credential_subject.fhir_version) {
        return Err(VcError::Validation(format!(
            "fhirVersion {:?} does not match ^\\d+\\.\\d+\\.\\d+$",
            vc.credential_subject.fhir_version
        )));
    }
    bundle::validate(&vc.credential_subject.fhir_bundle)?;
    Ok(())
}

fn is_semver(s: &str) -> bool {
    let parts: Vec<_> = s.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Value {
        json!({"resourceType": "Bundle", "type": "collection", "entry": []})
    }

    #[test]
    fn create_sets_health_card_type_first() {
        let vc = create(&bundle(), CreateOptions::default()).unwrap();
        assert_eq!(vc.types[0], HEALTH_CARD_TYPE);
        assert_eq!(vc.credential_subject.fhir_version, "4.0.1");
    }

    #[test]
    fn create_appends_additional_types_in_order() {
        let opts = CreateOptions {
            include_additional_types: vec!["https://example.org#extra".to_string()],
            ..Default::default()
        };
        let vc = create(&bundle(), opts).unwrap();
        assert_eq!(
            vc.types,
            vec![HEALTH_CARD_TYPE, "https://example.org#extra"]
        );
    }

    #[test]
    fn create_rejects_invalid_bundle() {
        let bad = json!({"resourceType": "NotBundle"});
        assert!(create(&bad, CreateOptions::default()).is_err());
    }

    #[test]
    fn validate_rejects_missing_health_card_type() {
        let vc = Vc {
            types: vec!["https://example.org#other".to_string()],
            credential_subject: CredentialSubject {
                fhir_version: "4.0.1".to_string(),
                fhir_bundle: bundle(),
            },
        };
        assert!(validate(&vc).is_err());
    }

    #[test]
    fn validate_rejects_bad_fhir_version() {
        let vc = Vc {
            types: vec![HEALTH_CARD_TYPE.to_string()],
            credential_subject: CredentialSubject {
                fhir_version: "4.0".to_string(),
                fhir_bundle: bundle(),
            },
        };
        assert!(validate(&vc).is_err());
    }
}
