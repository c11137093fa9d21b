use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KensaError, Result};
use crate::validation::Validator;

/// A resource as a tagged record: its type name plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// All other fields are stored here
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// FHIR resource metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "versionId", skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    /// security, tag and extensions pass through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            meta: None,
            rest: Map::new(),
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_value(value: Value) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> std::result::Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.rest.get(field)
    }
}

/// Builds a [`Resource`] field by field.
///
/// Nothing is checked while building; [`build_or_throw`](Self::build_or_throw)
/// runs the same validation as [`Validator::validate`].
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource: Resource::new(resource_type),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.resource.id = Some(id.into());
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.resource.meta = Some(meta);
        self
    }

    /// Set a field, replacing any previous value.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match (field, value) {
            ("resourceType", Value::String(name)) => self.resource.resource_type = name,
            ("id", Value::String(id)) => self.resource.id = Some(id),
            ("meta", value) => match serde_json::from_value::<Meta>(value.clone()) {
                Ok(meta) => self.resource.meta = Some(meta),
                // left for validation to report
                Err(_) => {
                    self.resource.rest.insert(field.to_string(), value);
                }
            },
            (_, value) => {
                self.resource.rest.insert(field.to_string(), value);
            }
        }
        self
    }

    /// Append to a repeating field.
    pub fn push(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.resource.rest.get_mut(field) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.resource
                    .rest
                    .insert(field.to_string(), Value::Array(vec![value]));
            }
        }
        self
    }

    pub fn build(self) -> Resource {
        self.resource
    }

    /// Build and validate; any error or fatal issue rejects the resource with
    /// the full outcome attached.
    pub async fn build_or_throw(self, validator: &Validator) -> Result<Resource> {
        let resource = self.build();
        let document = resource.to_value()?;
        let outcome = validator
            .validate(&document, Some(&resource.resource_type))
            .await?;
        if outcome.is_valid() {
            Ok(resource)
        } else {
            tracing::debug!(
                "Rejected {} built in code: {} error(s)",
                resource.resource_type,
                outcome.error_count()
            );
            Err(KensaError::Rejected { outcome })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Revision, StructureRegistry};
    use crate::validation::IssueCode;
    use serde_json::json;
    use std::sync::Arc;

    fn validator() -> Validator {
        Validator::new(Arc::new(StructureRegistry::embedded().unwrap()), Revision::R4)
    }

    #[test]
    fn test_parse_patient() {
        let json = r#"{
            "resourceType": "Patient",
            "id": "123",
            "meta": {
                "versionId": "1",
                "lastUpdated": "2024-01-01T00:00:00Z",
                "tag": [{"code": "test"}]
            },
            "name": [{"family": "Doe", "given": ["Jane"]}]
        }"#;

        let resource = Resource::from_json(json).unwrap();
        assert_eq!(resource.resource_type, "Patient");
        assert_eq!(resource.id, Some("123".to_string()));
        let meta = resource.meta.as_ref().unwrap();
        assert!(meta.extra.contains_key("tag"));
        assert!(resource.get("name").is_some());

        let value = resource.to_value().unwrap();
        assert_eq!(value["meta"]["tag"][0]["code"], "test");
    }

    #[test]
    fn test_builder_routes_fields() {
        let resource = ResourceBuilder::new("Patient")
            .set("id", "p1")
            .set("meta", json!({"versionId": "2"}))
            .set("active", true)
            .push("name", json!({"family": "Doe"}))
            .push("name", json!({"family": "Roe"}))
            .build();

        assert_eq!(resource.id.as_deref(), Some("p1"));
        assert_eq!(resource.meta.unwrap().version_id.as_deref(), Some("2"));
        assert_eq!(resource.rest["active"], json!(true));
        assert_eq!(resource.rest["name"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_push_onto_single_value_makes_array() {
        let resource = ResourceBuilder::new("Patient")
            .set("telecom", json!({"value": "555"}))
            .push("telecom", json!({"value": "556"}))
            .build();
        assert_eq!(resource.rest["telecom"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_build_or_throw_accepts_valid_resource() {
        let resource = ResourceBuilder::new("Patient")
            .id("p1")
            .set("active", true)
            .set("gender", "female")
            .build_or_throw(&validator())
            .await
            .unwrap();
        assert_eq!(resource.resource_type, "Patient");
    }

    #[tokio::test]
    async fn test_build_or_throw_rejects_with_outcome() {
        let err = ResourceBuilder::new("Observation")
            .set("status", "final")
            .set("valueBoolean", "yes")
            .build_or_throw(&validator())
            .await
            .unwrap_err();

        let outcome = err.outcome().expect("rejection carries the outcome");
        let found: Vec<(IssueCode, &str)> = outcome
            .errors()
            .map(|i| (i.code, i.path.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                (IssueCode::MissingRequiredField, "Observation.code"),
                (IssueCode::TypeMismatch, "Observation.valueBoolean"),
            ]
        );
        assert_eq!(err.to_string(), "Resource rejected with 2 error(s)");
    }

    #[tokio::test]
    async fn test_build_or_throw_unknown_type() {
        let err = ResourceBuilder::new("Starship")
            .build_or_throw(&validator())
            .await
            .unwrap_err();
        let outcome = err.outcome().unwrap();
        assert_eq!(outcome.issue.len(), 1);
        assert_eq!(outcome.issue[0].code, IssueCode::UnknownResourceType);
    }
}
