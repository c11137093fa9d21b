use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use http_body_util::BodyExt;
use kensa_core::{KensaError, OperationOutcome, Revision, Validator, operation_outcome::IssueType};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::{fhir_response, outcome_error};

type HandlerResult = Result<Response, (StatusCode, Json<Value>)>;

#[derive(Debug, Default, Deserialize)]
pub struct ValidateParams {
    /// `R4`, `R4B`, `R5` or a version number
    pub revision: Option<String>,
}

/// $validate operation (POST /{resource_type}/$validate)
///
/// Returns 200 OK with an OperationOutcome whether or not the resource is
/// valid.
pub async fn validate_type(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<ValidateParams>,
    request: Request,
) -> HandlerResult {
    run_validate(&state, Some(resource_type), params, request).await
}

/// $validate operation (POST /$validate), typed by the body's resourceType
pub async fn validate_any(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValidateParams>,
    request: Request,
) -> HandlerResult {
    run_validate(&state, None, params, request).await
}

async fn run_validate(
    state: &AppState,
    resource_type: Option<String>,
    params: ValidateParams,
    request: Request,
) -> HandlerResult {
    let validator = select_validator(state, params.revision.as_deref())?;

    let bytes = request
        .into_body()
        .collect()
        .await
        .map_err(|e| {
            outcome_error(
                StatusCode::BAD_REQUEST,
                OperationOutcome::error(IssueType::Invalid, e.to_string()),
            )
        })?
        .to_bytes();

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        outcome_error(
            StatusCode::BAD_REQUEST,
            OperationOutcome::invalid_resource(format!("Request body is not valid JSON: {}", e)),
        )
    })?;

    let resource = unwrap_parameters(value);

    let outcome = validator
        .validate(&resource, resource_type.as_deref())
        .await
        .map_err(|e| match e {
            KensaError::Cancelled(reason) => {
                tracing::warn!("Validation abandoned: {}", reason);
                outcome_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    OperationOutcome::transient(reason),
                )
            }
            KensaError::InvalidDocument { message } => outcome_error(
                StatusCode::BAD_REQUEST,
                OperationOutcome::invalid_resource(message),
            ),
            other => {
                tracing::error!("Validation failed: {}", other);
                outcome_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    OperationOutcome::error(IssueType::Exception, other.to_string()),
                )
            }
        })?;

    tracing::info!(
        "$validate {} against FHIR {}: {} issue(s), valid={}",
        resource_type.as_deref().unwrap_or("(untyped)"),
        validator.revision(),
        outcome.issue.len(),
        outcome.is_valid()
    );

    Ok(fhir_response(
        StatusCode::OK,
        json!(outcome.to_operation_outcome()),
    ))
}

fn select_validator<'a>(
    state: &'a AppState,
    requested: Option<&str>,
) -> Result<&'a Validator, (StatusCode, Json<Value>)> {
    let revision = match requested {
        Some(text) => text.parse::<Revision>().map_err(|e| {
            outcome_error(
                StatusCode::BAD_REQUEST,
                OperationOutcome::error(IssueType::NotSupported, e),
            )
        })?,
        None => state.config.validation.revision,
    };

    state.validator(revision).ok_or_else(|| {
        outcome_error(
            StatusCode::BAD_REQUEST,
            OperationOutcome::error(
                IssueType::NotSupported,
                format!("No structure definitions loaded for FHIR {}", revision),
            ),
        )
    })
}

/// The `resource` parameter of a `Parameters` wrapper, or the body itself.
fn unwrap_parameters(value: Value) -> Value {
    if value.get("resourceType").and_then(|v| v.as_str()) != Some("Parameters") {
        return value;
    }
    value
        .get("parameter")
        .and_then(|p| p.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|p| p.get("name").and_then(|n| n.as_str()) == Some("resource"))
        })
        .and_then(|p| p.get("resource"))
        .cloned()
        .unwrap_or(value)
}
