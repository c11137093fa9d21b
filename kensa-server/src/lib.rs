//! kensa - FHIR structural validation service
//!
//! Serves the `$validate` operation over every revision loaded in the
//! structure registry.

pub mod config;
pub mod handlers;

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use kensa_core::{
    InMemoryValueSets, Revision, StructureRegistry, Validator, ValueSetOracle,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    map_response_body::MapResponseBodyLayer,
    trace::TraceLayer,
};

/// Application state
pub struct AppState {
    pub config: config::ServerConfig,
    pub registry: Arc<StructureRegistry>,
    validators: HashMap<Revision, Validator>,
}

impl AppState {
    /// Load the structure tables and value sets named by `config` and build one
    /// validator per revision.
    pub fn from_config(config: config::ServerConfig) -> kensa_core::Result<Self> {
        let registry = Arc::new(StructureRegistry::load(config.definitions.dir.as_deref())?);

        let mut value_sets = InMemoryValueSets::new();
        if let Some(dir) = &config.terminology.value_sets_dir {
            value_sets.load_from_directory(dir)?;
        }
        let oracle: Arc<dyn ValueSetOracle> = Arc::new(value_sets);

        let validators = registry
            .revisions()
            .into_iter()
            .map(|revision| {
                let validator = Validator::new(registry.clone(), revision)
                    .with_oracle(oracle.clone())
                    .with_options(config.validation.options.clone());
                (revision, validator)
            })
            .collect();

        Ok(Self {
            config,
            registry,
            validators,
        })
    }

    pub fn validator(&self, revision: Revision) -> Option<&Validator> {
        self.validators.get(&revision)
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(MapResponseBodyLayer::new(axum::body::Body::new))
        .layer(RequestBodyLimitLayer::new(state.config.server.max_body_bytes));

    Router::new()
        .route("/health", get(handlers::metadata::health_check))
        .route("/metadata", get(handlers::metadata::capability_statement))
        .route("/$validate", post(handlers::validate::validate_any))
        .route(
            "/{resource_type}/$validate",
            post(handlers::validate::validate_type),
        )
        .layer(middleware)
        .with_state(state)
}
