//! Health endpoints
//!
//! - `/healthz` answers as long as the process serves requests
//! - `/readyz` turns 200 once the startup reconciliation has finished and
//!   lists every tenant engine with its lifecycle state
//! - `/metrics` is the Prometheus text exposition

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::metrics::Metrics;

/// One tenant engine as reported by `/readyz`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStatus {
    pub tenant_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Source of readiness for `/readyz`
pub trait ReadinessChecker: Send + Sync {
    fn is_ready(&self) -> bool;

    fn tenant_statuses(&self) -> Vec<TenantStatus>;
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Number of tenant engines in each lifecycle state
    pub states: BTreeMap<String, usize>,
    pub tenants: Vec<TenantStatus>,
}

impl ReadinessResponse {
    /// Snapshot the checker; without one the service counts as ready
    pub fn collect(checker: Option<&dyn ReadinessChecker>) -> Self {
        let Some(checker) = checker else {
            return Self {
                ready: true,
                states: BTreeMap::new(),
                tenants: Vec::new(),
            };
        };

        let tenants = checker.tenant_statuses();
        let mut states = BTreeMap::new();
        for tenant in &tenants {
            *states.entry(tenant.state.clone()).or_insert(0) += 1;
        }
        Self {
            ready: checker.is_ready(),
            states,
            tenants,
        }
    }

    fn status_code(&self) -> StatusCode {
        if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Clone)]
pub struct HealthState {
    metrics: Arc<Metrics>,
    readiness: Option<Arc<dyn ReadinessChecker>>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            readiness: None,
        }
    }

    pub fn with_readiness(mut self, checker: Arc<dyn ReadinessChecker>) -> Self {
        self.readiness = Some(checker);
        self
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn readyz(State(state): State<HealthState>) -> Response {
    let response = ReadinessResponse::collect(state.readiness.as_deref());
    (response.status_code(), Json(response)).into_response()
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fleet {
        reconciled: bool,
        tenants: Vec<(&'static str, &'static str, Option<&'static str>)>,
    }

    impl ReadinessChecker for Fleet {
        fn is_ready(&self) -> bool {
            self.reconciled
        }

        fn tenant_statuses(&self) -> Vec<TenantStatus> {
            self.tenants
                .iter()
                .map(|(id, state, error)| TenantStatus {
                    tenant_id: id.to_string(),
                    state: state.to_string(),
                    last_error: error.map(str::to_string),
                })
                .collect()
        }
    }

    async fn get(state: HealthState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = health_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn state(fleet: Fleet) -> HealthState {
        HealthState::new(Arc::new(Metrics::new().unwrap())).with_readiness(Arc::new(fleet))
    }

    #[tokio::test]
    async fn test_readyz_unavailable_until_reconciled() {
        let fleet = Fleet {
            reconciled: false,
            tenants: vec![("acme", "initializing", None)],
        };
        let (status, body) = get(state(fleet), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let response: ReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert!(!response.ready);
        assert_eq!(response.states.get("initializing"), Some(&1));
    }

    #[tokio::test]
    async fn test_readyz_reports_failed_tenants() {
        let fleet = Fleet {
            reconciled: true,
            tenants: vec![
                ("acme", "started", None),
                ("beta", "failed", Some("start failed: port in use")),
                ("gamma", "started", None),
            ],
        };
        let (status, body) = get(state(fleet), "/readyz").await;
        assert_eq!(status, StatusCode::OK);

        let response: ReadinessResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.states.get("started"), Some(&2));
        assert_eq!(response.states.get("failed"), Some(&1));
        assert_eq!(
            response.tenants[1].last_error.as_deref(),
            Some("start failed: port in use")
        );
    }

    #[tokio::test]
    async fn test_metrics_exposes_lifecycle_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_assure("started");

        let (status, body) = get(HealthState::new(metrics), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("tenantry_assure_requests_total"));
    }
}
