//! HTTP surface: request decoding, reply shaping, the metrics and liveness endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::coordinator::{Coordinator, LockOutcome, UnlockOutcome};

const FLEET_LOCK_HEADER: &str = "fleet-lock-protocol";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub prometheus: Arc<PrometheusHandle>,
}

#[derive(Debug, Deserialize)]
pub struct Request {
    pub client_params: ClientParams,
}

#[derive(Debug, Deserialize)]
pub struct ClientParams {
    pub id: String,
    pub group: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    MethodNotAllowed,
    MissingHeader,
    DecodeError,
    InternalError,
    LockHeld,
}

impl ReplyKind {
    fn status(self) -> StatusCode {
        match self {
            ReplyKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ReplyKind::MissingHeader => StatusCode::BAD_REQUEST,
            ReplyKind::DecodeError => StatusCode::BAD_REQUEST,
            ReplyKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ReplyKind::LockHeld => StatusCode::LOCKED,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Reply {
    kind: ReplyKind,
    value: String,
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let mut response = (status, Json(self)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        response
            .headers_mut()
            .insert("x-content-type-options", "nosniff".parse().unwrap());
        response
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/pre-reboot", any(pre_reboot))
        .route("/v1/steady-state", any(steady_state))
        .route("/metrics", get(metrics_endpoint))
        .route("/-/healthy", get(healthy))
        .with_state(state)
}

async fn healthy() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

/// Validates the common FleetLock preamble (header, body decode, non-empty fields),
/// returning the parsed request or the reply kind that should short-circuit it.
fn validate(headers: &HeaderMap, body: &[u8]) -> Result<(String, String), Reply> {
    let has_header = headers
        .get(FLEET_LOCK_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if !has_header {
        tracing::debug!("request missing fleet-lock-protocol header");
        return Err(Reply {
            kind: ReplyKind::MissingHeader,
            value: "fleet-lock-protocol header missing or not true".to_string(),
        });
    }

    let request: Request = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "request body decode failure");
        Reply {
            kind: ReplyKind::DecodeError,
            value: "could not decode request body".to_string(),
        }
    })?;

    if request.client_params.id.is_empty() || request.client_params.group.is_empty() {
        tracing::debug!("request missing id or group");
        return Err(Reply {
            kind: ReplyKind::DecodeError,
            value: "client_params.id and client_params.group are required".to_string(),
        });
    }

    Ok((request.client_params.id, request.client_params.group))
}

async fn pre_reboot(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if method != Method::POST {
        return method_not_allowed().into_response();
    }

    let (id, group) = match validate(&headers, &body) {
        Ok(parsed) => parsed,
        Err(reply) => return reply.into_response(),
    };

    match state.coordinator.lock(&id, &group).await {
        Ok(LockOutcome::Obtained) => {
            plain_text("obtained reboot lease".to_string()).into_response()
        }
        Ok(LockOutcome::Retained) => {
            plain_text("retained reboot lease".to_string()).into_response()
        }
        Ok(LockOutcome::Held { holder }) => Reply {
            kind: ReplyKind::LockHeld,
            value: format!("reboot lease lock unavailable, held by {holder}"),
        }
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn steady_state(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if method != Method::POST {
        return method_not_allowed().into_response();
    }

    let (id, group) = match validate(&headers, &body) {
        Ok(parsed) => parsed,
        Err(reply) => return reply.into_response(),
    };

    match state.coordinator.unlock(&id, &group).await {
        Ok(UnlockOutcome::Unlocked) => {
            plain_text(format!("unlocked reboot lease for {id}")).into_response()
        }
        Ok(UnlockOutcome::AlreadyUnlocked) => {
            plain_text("reboot lease already unlocked".to_string()).into_response()
        }
        Ok(UnlockOutcome::Held { holder }) => Reply {
            kind: ReplyKind::LockHeld,
            value: format!("reboot lease lock unavailable, held by {holder}"),
        }
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

fn plain_text(value: String) -> impl IntoResponse {
    (StatusCode::OK, value)
}

fn method_not_allowed() -> Reply {
    Reply {
        kind: ReplyKind::MethodNotAllowed,
        value: "method not allowed".to_string(),
    }
}

fn internal_error(e: crate::error::Error) -> Reply {
    tracing::error!(error = %e, "backend error handling request");
    Reply {
        kind: ReplyKind::InternalError,
        value: "internal error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::mock::MockDrainer;
    use crate::nodes::mock::MockNodeResolver;
    use crate::slot::mock::MockSlotStore;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let coordinator = Coordinator::new(
            Arc::new(MockSlotStore::new()),
            Arc::new(MockNodeResolver::new(HashMap::new())),
            Arc::new(MockDrainer::new()),
        );
        router(AppState {
            coordinator: Arc::new(coordinator),
            prometheus: Arc::new(crate::metrics::install_recorder()),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let app = test_app();
        let request = axum::http::Request::post("/v1/pre-reboot")
            .body(Body::from(
                r#"{"client_params":{"id":"A","group":"workers"}}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "missing_header");
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let app = test_app();
        let request = axum::http::Request::get("/v1/pre-reboot")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn first_acquire_succeeds() {
        let app = test_app();
        let request = axum::http::Request::post("/v1/pre-reboot")
            .header(FLEET_LOCK_HEADER, "true")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"client_params":{"id":"A","group":"workers"}}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthy_endpoint_reports_ok() {
        let app = test_app();
        let request = axum::http::Request::get("/-/healthy").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
