//! Value-set oracle consulted for bound coded elements.
//!
//! The validator only needs to know whether a code is allowed by a binding;
//! where that answer comes from is up to the [`ValueSetOracle`] implementation.
//! [`InMemoryValueSets`] covers the common base-standard value sets and can load
//! more from `ValueSet` resources on disk.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::error::Result;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Terminology source unavailable: {0}")]
    Unavailable(String),

    #[error("Terminology lookup failed: {0}")]
    Failed(String),
}

/// Answers "is `code` allowed by the value set bound at this element?".
#[async_trait]
pub trait ValueSetOracle: Send + Sync {
    async fn is_code_allowed(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> std::result::Result<bool, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    pub system: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct ValueSet {
    pub url: String,
    pub concepts: Vec<Concept>,
}

impl ValueSet {
    /// Value set whose codes all come from one code system
    pub fn from_codes(url: impl Into<String>, system: &str, codes: &[&str]) -> Self {
        Self {
            url: url.into(),
            concepts: codes
                .iter()
                .map(|code| Concept {
                    system: Some(system.to_string()),
                    code: code.to_string(),
                })
                .collect(),
        }
    }

    /// Build from a FHIR `ValueSet` resource, using enumerated
    /// `compose.include.concept` entries and any `expansion.contains` codes.
    pub fn from_resource(resource: &Value) -> Option<Self> {
        if resource.get("resourceType").and_then(|v| v.as_str()) != Some("ValueSet") {
            return None;
        }
        let url = resource.get("url").and_then(|v| v.as_str())?;
        let mut concepts = Vec::new();

        let includes = resource
            .pointer("/compose/include")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten();
        for include in includes {
            let system = include.get("system").and_then(|v| v.as_str());
            let codes = include
                .get("concept")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|c| c.get("code").and_then(|v| v.as_str()));
            for code in codes {
                concepts.push(Concept {
                    system: system.map(String::from),
                    code: code.to_string(),
                });
            }
        }

        let contains = resource
            .pointer("/expansion/contains")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten();
        for entry in contains {
            if let Some(code) = entry.get("code").and_then(|v| v.as_str()) {
                let concept = Concept {
                    system: entry.get("system").and_then(|v| v.as_str()).map(String::from),
                    code: code.to_string(),
                };
                if !concepts.contains(&concept) {
                    concepts.push(concept);
                }
            }
        }

        Some(Self {
            url: url.to_string(),
            concepts,
        })
    }

    pub fn contains(&self, system: Option<&str>, code: &str) -> bool {
        self.concepts.iter().any(|concept| {
            concept.code == code
                && match (system, concept.system.as_deref()) {
                    (Some(requested), Some(declared)) => requested == declared,
                    _ => true,
                }
        })
    }
}

/// Base-standard value sets preloaded into [`InMemoryValueSets::new`]:
/// (value set id, code system, codes).
const BUILTIN_VALUE_SETS: &[(&str, &str, &[&str])] = &[
    (
        "administrative-gender",
        "http://hl7.org/fhir/administrative-gender",
        &["male", "female", "other", "unknown"],
    ),
    (
        "observation-status",
        "http://hl7.org/fhir/observation-status",
        &[
            "registered",
            "preliminary",
            "final",
            "amended",
            "corrected",
            "cancelled",
            "entered-in-error",
            "unknown",
        ],
    ),
    (
        "bundle-type",
        "http://hl7.org/fhir/bundle-type",
        &[
            "document",
            "message",
            "transaction",
            "transaction-response",
            "batch",
            "batch-response",
            "history",
            "searchset",
            "collection",
            "subscription-notification",
        ],
    ),
    (
        "http-verb",
        "http://hl7.org/fhir/http-verb",
        &["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"],
    ),
    (
        "search-entry-mode",
        "http://hl7.org/fhir/search-entry-mode",
        &["match", "include", "outcome"],
    ),
    (
        "encounter-status",
        "http://hl7.org/fhir/encounter-status",
        &[
            "planned",
            "arrived",
            "triaged",
            "in-progress",
            "onleave",
            "finished",
            "cancelled",
            "entered-in-error",
            "unknown",
        ],
    ),
    (
        "encounter-status|5.0.0",
        "http://hl7.org/fhir/encounter-status",
        &[
            "planned",
            "in-progress",
            "on-hold",
            "discharged",
            "completed",
            "cancelled",
            "discontinued",
            "entered-in-error",
            "unknown",
        ],
    ),
    (
        "encounter-location-status",
        "http://hl7.org/fhir/encounter-location-status",
        &["planned", "active", "reserved", "completed"],
    ),
    (
        "issue-severity",
        "http://hl7.org/fhir/issue-severity",
        &["fatal", "error", "warning", "information"],
    ),
    (
        "issue-type",
        "http://hl7.org/fhir/issue-type",
        &[
            "invalid",
            "structure",
            "required",
            "value",
            "invariant",
            "security",
            "login",
            "unknown",
            "expired",
            "forbidden",
            "suppressed",
            "processing",
            "not-supported",
            "duplicate",
            "multiple-matches",
            "not-found",
            "deleted",
            "too-long",
            "code-invalid",
            "extension",
            "too-costly",
            "business-rule",
            "conflict",
            "limited-filter",
            "transient",
            "lock-error",
            "no-store",
            "exception",
            "timeout",
            "incomplete",
            "throttled",
            "informational",
            "success",
        ],
    ),
    (
        "name-use",
        "http://hl7.org/fhir/name-use",
        &["usual", "official", "temp", "nickname", "anonymous", "old", "maiden"],
    ),
    (
        "identifier-use",
        "http://hl7.org/fhir/identifier-use",
        &["usual", "official", "temp", "secondary", "old"],
    ),
    (
        "contact-point-system",
        "http://hl7.org/fhir/contact-point-system",
        &["phone", "fax", "email", "pager", "url", "sms", "other"],
    ),
    (
        "contact-point-use",
        "http://hl7.org/fhir/contact-point-use",
        &["home", "work", "temp", "old", "mobile"],
    ),
    (
        "address-use",
        "http://hl7.org/fhir/address-use",
        &["home", "work", "temp", "old", "billing"],
    ),
    (
        "address-type",
        "http://hl7.org/fhir/address-type",
        &["postal", "physical", "both"],
    ),
    (
        "quantity-comparator",
        "http://hl7.org/fhir/quantity-comparator",
        &["<", "<=", ">=", ">"],
    ),
    (
        "link-type",
        "http://hl7.org/fhir/link-type",
        &["replaced-by", "replaces", "refer", "seealso"],
    ),
    (
        "narrative-status",
        "http://hl7.org/fhir/narrative-status",
        &["generated", "extensions", "additional", "empty"],
    ),
    (
        "units-of-time",
        "http://unitsofmeasure.org",
        &["s", "min", "h", "d", "wk", "mo", "a"],
    ),
    (
        "days-of-week",
        "http://hl7.org/fhir/days-of-week",
        &["mon", "tue", "wed", "thu", "fri", "sat", "sun"],
    ),
    (
        "observation-triggeredbytype",
        "http://hl7.org/fhir/observation-triggeredbytype",
        &["reflex", "repeat", "re-run"],
    ),
];

/// Value sets held in memory.
///
/// Unknown value sets allow every code: the engine cannot judge a binding it
/// has no content for.
#[derive(Debug, Clone)]
pub struct InMemoryValueSets {
    value_sets: HashMap<String, ValueSet>,
}

impl InMemoryValueSets {
    /// Registry preloaded with common base-standard value sets
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (id, system, codes) in BUILTIN_VALUE_SETS {
            registry.add_value_set(ValueSet::from_codes(
                format!("http://hl7.org/fhir/ValueSet/{}", id),
                system,
                codes,
            ));
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            value_sets: HashMap::new(),
        }
    }

    pub fn add_value_set(&mut self, value_set: ValueSet) {
        self.value_sets.insert(value_set.url.clone(), value_set);
    }

    pub fn len(&self) -> usize {
        self.value_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_sets.is_empty()
    }

    /// Find a value set by canonical URL, falling back to the unversioned URL
    /// for `url|version` references.
    pub fn get(&self, url: &str) -> Option<&ValueSet> {
        self.value_sets.get(url).or_else(|| {
            url.split_once('|')
                .and_then(|(unversioned, _)| self.value_sets.get(unversioned))
        })
    }

    /// Validate a code against a ValueSet
    pub fn validate_code(&self, value_set_url: &str, system: Option<&str>, code: &str) -> bool {
        match self.get(value_set_url) {
            Some(value_set) => value_set.contains(system, code),
            None => true,
        }
    }

    /// Load `ValueSet` resources (single resources or Bundles of them) from a directory
    pub fn load_from_directory(&mut self, dir_path: impl AsRef<Path>) -> Result<usize> {
        let dir_path = dir_path.as_ref();
        if !dir_path.exists() {
            return Ok(0);
        }

        let mut paths = std::fs::read_dir(dir_path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        // a value set defined twice keeps the one from the later file name
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let resource = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
                }) {
                Ok(resource) => resource,
                Err(e) => {
                    tracing::warn!("Failed to load value set {:?}: {}", path, e);
                    continue;
                }
            };

            let candidates: Vec<&Value> =
                match resource.get("resourceType").and_then(|v| v.as_str()) {
                    Some("Bundle") => resource
                        .get("entry")
                        .and_then(|v| v.as_array())
                        .into_iter()
                        .flatten()
                        .filter_map(|entry| entry.get("resource"))
                        .collect(),
                    _ => vec![&resource],
                };
            for candidate in candidates {
                if let Some(value_set) = ValueSet::from_resource(candidate) {
                    self.add_value_set(value_set);
                    loaded += 1;
                }
            }
        }

        tracing::info!("Loaded {} value sets from {:?}", loaded, dir_path);
        Ok(loaded)
    }
}

impl Default for InMemoryValueSets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueSetOracle for InMemoryValueSets {
    async fn is_code_allowed(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> std::result::Result<bool, OracleError> {
        Ok(self.validate_code(value_set, system, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const GENDER: &str = "http://hl7.org/fhir/ValueSet/administrative-gender";

    #[test]
    fn test_builtin_gender() {
        let registry = InMemoryValueSets::new();

        assert!(registry.validate_code(GENDER, None, "male"));
        assert!(registry.validate_code(GENDER, None, "female"));
        assert!(!registry.validate_code(GENDER, None, "invalid"));
    }

    #[test]
    fn test_system_must_match_when_given() {
        let registry = InMemoryValueSets::new();

        assert!(registry.validate_code(
            GENDER,
            Some("http://hl7.org/fhir/administrative-gender"),
            "male"
        ));
        assert!(!registry.validate_code(GENDER, Some("http://snomed.info/sct"), "male"));
    }

    #[test]
    fn test_versioned_url_prefers_exact_match() {
        let registry = InMemoryValueSets::new();
        let r5 = "http://hl7.org/fhir/ValueSet/encounter-status|5.0.0";
        let r4 = "http://hl7.org/fhir/ValueSet/encounter-status";

        assert!(registry.validate_code(r5, None, "discharged"));
        assert!(!registry.validate_code(r5, None, "finished"));
        assert!(registry.validate_code(r4, None, "finished"));
        // unknown version falls back to the unversioned set
        assert!(registry.validate_code(
            "http://hl7.org/fhir/ValueSet/encounter-status|4.0.1",
            None,
            "finished"
        ));
    }

    #[test]
    fn test_unknown_value_set_allows_code() {
        let registry = InMemoryValueSets::new();
        assert!(registry.validate_code("http://example.org/ValueSet/anything", None, "x"));
    }

    #[test]
    fn test_value_set_from_resource() {
        let resource = json!({
            "resourceType": "ValueSet",
            "url": "http://example.org/ValueSet/colors",
            "compose": {"include": [{
                "system": "http://example.org/colors",
                "concept": [{"code": "red"}, {"code": "green"}]
            }]},
            "expansion": {"contains": [
                {"system": "http://example.org/colors", "code": "red"},
                {"system": "http://example.org/colors", "code": "blue"}
            ]}
        });

        let value_set = ValueSet::from_resource(&resource).unwrap();
        assert_eq!(value_set.concepts.len(), 3);
        assert!(value_set.contains(None, "blue"));
        assert!(!value_set.contains(None, "purple"));
        assert!(ValueSet::from_resource(&json!({"resourceType": "Patient"})).is_none());
    }

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {
                "resourceType": "ValueSet",
                "url": "http://example.org/ValueSet/sizes",
                "compose": {"include": [{"system": "http://example.org/sizes", "concept": [{"code": "S"}, {"code": "M"}]}]}
            }}]
        });
        fs::write(
            temp_dir.path().join("sizes.json"),
            serde_json::to_string_pretty(&bundle).unwrap(),
        )
        .unwrap();
        fs::write(temp_dir.path().join("broken.json"), "[").unwrap();

        let mut registry = InMemoryValueSets::empty();
        let loaded = registry.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(loaded, 1);
        assert!(registry.validate_code("http://example.org/ValueSet/sizes", None, "M"));
        assert!(!registry.validate_code("http://example.org/ValueSet/sizes", None, "XL"));
    }

    #[test]
    fn test_later_file_wins_for_duplicate_url() {
        let temp_dir = TempDir::new().unwrap();
        for (file, code) in [("b-sizes.json", "L"), ("a-sizes.json", "S")] {
            let value_set = json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/ValueSet/sizes",
                "compose": {"include": [{"concept": [{"code": code}]}]}
            });
            fs::write(temp_dir.path().join(file), value_set.to_string()).unwrap();
        }

        let mut registry = InMemoryValueSets::empty();
        assert_eq!(registry.load_from_directory(temp_dir.path()).unwrap(), 2);
        assert!(registry.validate_code("http://example.org/ValueSet/sizes", None, "L"));
        assert!(!registry.validate_code("http://example.org/ValueSet/sizes", None, "S"));
    }

    #[tokio::test]
    async fn test_oracle_trait() {
        let oracle: &dyn ValueSetOracle = &InMemoryValueSets::new();
        assert!(oracle.is_code_allowed(GENDER, None, "other").await.unwrap());
        assert!(!oracle.is_code_allowed(GENDER, None, "robot").await.unwrap());
    }
}
