use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::fhir_response;

const VALIDATE_DEFINITION: &str = "http://hl7.org/fhir/OperationDefinition/Resource-validate";

/// Health check (GET /health)
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let revision = state.config.validation.revision;
    let revisions: Vec<&str> = state
        .registry
        .revisions()
        .into_iter()
        .map(|r| r.as_str())
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "revision": revision.as_str(),
        "fhirVersion": state.registry.fhir_version(revision),
        "revisions": revisions
    }))
}

/// CapabilityStatement for the default revision (GET /metadata)
pub async fn capability_statement(State(state): State<Arc<AppState>>) -> Response {
    let revision = state.config.validation.revision;
    let validate_operation = json!({"name": "validate", "definition": VALIDATE_DEFINITION});

    let resources: Vec<Value> = state
        .registry
        .resource_types(revision)
        .into_iter()
        .map(|rt| {
            json!({
                "type": rt,
                "operation": [validate_operation],
            })
        })
        .collect();

    fhir_response(
        StatusCode::OK,
        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": state.registry.fhir_version(revision),
            "format": ["json"],
            "software": {
                "name": "kensa",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "implementation": {
                "description": "kensa - FHIR structural validation service",
                "url": format!("http://{}", state.config.bind_addr()),
            },
            "rest": [{
                "mode": "server",
                "resource": resources,
                "operation": [validate_operation],
            }]
        }),
    )
}
