//! FHIR Bundle validation and QR-density optimization (component A, §4.A).
//!
//! The optimizer is a pure, deterministic, idempotent structural rewrite — no
//! I/O, so it is a plain synchronous function per Design Note 3.

use serde_json::{Map, Value};

use crate::error::BundleError;

/// Bundle `type` values accepted by validation.
const ACCEPTED_TYPES: &[&str] = &[
    "collection",
    "batch",
    "history",
    "searchset",
    "transaction",
    "transaction-response",
];

/// Options controlling QR optimization.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOptions {
    /// Fail with `InvalidReference` when a `Type/id` reference cannot be
    /// resolved to an entry, rather than leaving it unrewritten.
    pub strict_references: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            strict_references: false,
        }
    }
}

/// Validates Bundle shape per §4.A. Does not mutate `bundle`.
pub fn validate(bundle: &Value) -> Result<(), BundleError> {
    let obj = bundle
        .as_object()
        .ok_or_else(|| BundleError::Validation("bundle must be an object".to_string()))?;

    if obj.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return Err(BundleError::Validation(
            "resourceType must be \"Bundle\"".to_string(),
        ));
    }

    if let Some(ty) = obj.get("type") {
        let ty = ty
            .as_str()
            .ok_or_else(|| BundleError::Validation("bundle.type must be a string".to_string()))?;
        if !ACCEPTED_TYPES.contains(&ty) {
            return Err(BundleError::Validation(format!(
                "bundle.type {ty:?} is not one of the accepted Bundle types"
            )));
        }
    }

    if let Some(entries) = obj.get("entry") {
        let entries = entries
            .as_array()
            .ok_or_else(|| BundleError::Validation("bundle.entry must be an array".to_string()))?;
        for (i, entry) in entries.iter().enumerate() {
            let entry = entry
                .as_object()
                .ok_or_else(|| BundleError::Validation(format!("entry[{i}] must be an object")))?;
            let resource = entry.get("resource").and_then(Value::as_object).ok_or_else(|| {
                BundleError::Validation(format!("entry[{i}] is missing a resource object"))
            })?;
            if resource.get("resourceType").and_then(Value::as_str).is_none() {
                return Err(BundleError::Validation(format!(
                    "entry[{i}].resource is missing resourceType"
                )));
            }
        }
    }

    Ok(())
}

/// Produces a new, QR-density-optimized Bundle per §4.A steps 1–7.
///
/// `bundle` must already satisfy [`validate`]; this function does not
/// re-validate it.
pub fn optimize(bundle: &Value, opts: OptimizeOptions) -> Result<Value, BundleError> {
    let obj = bundle
        .as_object()
        .ok_or_else(|| BundleError::Validation("bundle must be an object".to_string()))?;

    let empty = Vec::new();
    let entries = obj
        .get("entry")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    // Index entries by (resourceType, id) so references can be rewritten.
    let mut index_by_type_id = std::collections::HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if let Some(resource) = entry.get("resource").and_then(Value::as_object) {
            if let (Some(ty), Some(id)) = (
                resource.get("resourceType").and_then(Value::as_str),
                resource.get("id").and_then(Value::as_str),
            ) {
                index_by_type_id.insert(format!("{ty}/{id}"), i);
            }
        }
    }

    let mut out = Map::new();
    for (k, v) in obj {
        if k == "id" || k == "entry" {
            continue;
        }
        push_pruned(&mut out, k, v.clone());
    }

    let mut new_entries = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        new_entries.push(optimize_entry(entry, i, &index_by_type_id, opts)?);
    }
    if !new_entries.is_empty() {
        out.insert("entry".to_string(), Value::Array(new_entries));
    }

    Ok(Value::Object(out))
}

fn optimize_entry(
    entry: &Value,
    index: usize,
    index_by_type_id: &std::collections::HashMap<String, usize>,
    opts: OptimizeOptions,
) -> Result<Value, BundleError> {
    let entry_obj = entry
        .as_object()
        .ok_or_else(|| BundleError::Validation(format!("entry[{index}] must be an object")))?;

    let mut out = Map::new();
    out.insert("fullUrl".to_string(), Value::String(format!("resource:{index}")));

    let resource = entry_obj
        .get("resource")
        .and_then(Value::as_object)
        .ok_or_else(|| BundleError::Validation(format!("entry[{index}] missing resource")))?;

    let mut new_resource = Map::new();
    for (k, v) in resource {
        match k.as_str() {
            "id" | "text" => continue,
            "meta" => {
                if let Some(meta_obj) = v.as_object() {
                    if let Some(security) = meta_obj.get("security") {
                        if !is_empty_value(security) {
                            let mut meta = Map::new();
                            meta.insert("security".to_string(), security.clone());
                            new_resource.insert("meta".to_string(), Value::Object(meta));
                        }
                    }
                }
            }
            _ => {
                let rewritten = rewrite_value(v, index_by_type_id, opts)?;
                push_pruned(&mut new_resource, k, rewritten);
            }
        }
    }

    out.insert("resource".to_string(), Value::Object(new_resource));

    // carry any other entry-level fields (e.g. search/request), pruned and
    // with references rewritten, but never fullUrl (already overwritten).
    for (k, v) in entry_obj {
        if k == "fullUrl" || k == "resource" {
            continue;
        }
        let rewritten = rewrite_value(v, index_by_type_id, opts)?;
        push_pruned(&mut out, k, rewritten);
    }

    Ok(Value::Object(out))
}

/// Recursively rewrites `Reference.reference` strings and strips
/// `CodeableConcept.text` / `Coding.display`, per §4.A steps 3–6. Structural
/// heuristics only (§9 open question): a `CodeableConcept` is any object
/// with a `coding` array; a `Coding` is any object found inside such an
/// array.
fn rewrite_value(
    value: &Value,
    index_by_type_id: &std::collections::HashMap<String, usize>,
    opts: OptimizeOptions,
) -> Result<Value, BundleError> {
    match value {
        Value::Object(obj) => {
            let is_codeable_concept = obj.get("coding").map(Value::is_array).unwrap_or(false);
            let mut out = Map::new();
            for (k, v) in obj {
                if is_codeable_concept && k == "text" {
                    continue;
                }
                if is_codeable_concept && k == "coding" {
                    let coding_array = v.as_array().expect("checked is_array above");
                    let mut new_codings = Vec::with_capacity(coding_array.len());
                    for coding in coding_array {
                        new_codings.push(rewrite_coding(coding, index_by_type_id, opts)?);
                    }
                    push_pruned(&mut out, k, Value::Array(new_codings));
                    continue;
                }
                if k == "reference" {
                    if let Some(s) = v.as_str() {
                        let rewritten = rewrite_reference(s, index_by_type_id, opts)?;
                        out.insert(k.clone(), Value::String(rewritten));
                        continue;
                    }
                }
                let rewritten = rewrite_value(v, index_by_type_id, opts)?;
                push_pruned(&mut out, k, rewritten);
            }
            Ok(Value::Object(out))
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(rewrite_value(item, index_by_type_id, opts)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// A `Coding` object nested inside a `coding` array: drop `display`, rewrite
/// everything else normally (step 4).
fn rewrite_coding(
    value: &Value,
    index_by_type_id: &std::collections::HashMap<String, usize>,
    opts: OptimizeOptions,
) -> Result<Value, BundleError> {
    let Some(obj) = value.as_object() else {
        return rewrite_value(value, index_by_type_id, opts);
    };
    let mut out = Map::new();
    for (k, v) in obj {
        if k == "display" {
            continue;
        }
        if k == "reference" {
            if let Some(s) = v.as_str() {
                let rewritten = rewrite_reference(s, index_by_type_id, opts)?;
                out.insert(k.clone(), Value::String(rewritten));
                continue;
            }
        }
        let rewritten = rewrite_value(v, index_by_type_id, opts)?;
        push_pruned(&mut out, k, rewritten);
    }
    Ok(Value::Object(out))
}

fn rewrite_reference(
    reference: &str,
    index_by_type_id: &std::collections::HashMap<String, usize>,
    opts: OptimizeOptions,
) -> Result<String, BundleError> {
    if reference.starts_with("resource:") || reference.starts_with('#') {
        return Ok(reference.to_string());
    }
    match index_by_type_id.get(reference) {
        Some(idx) => Ok(format!("resource:{idx}")),
        None if opts.strict_references => Err(BundleError::InvalidReference {
            reference: reference.to_string(),
        }),
        None => Ok(reference.to_string()),
    }
}

/// Step 7: drop a key entirely when its value is null or an empty array.
fn push_pruned(map: &mut Map<String, Value>, key: &str, value: Value) {
    if is_empty_value(&value) {
        return;
    }
    map.insert(key.to_string(), value);
}

fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::Array(a) if a.is_empty())
}
