pub mod metadata;
pub mod validate;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use kensa_core::OperationOutcome;
use serde_json::{Value, json};

pub const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// JSON response with the FHIR media type
pub fn fhir_response(status: StatusCode, body: Value) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
    (status, headers, Json(body)).into_response()
}

/// Error half of a handler result, carrying an OperationOutcome body
pub fn outcome_error(status: StatusCode, outcome: OperationOutcome) -> (StatusCode, Json<Value>) {
    (status, Json(json!(outcome)))
}
