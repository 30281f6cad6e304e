//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use super::handler::{request_token, ws_handler, WsParams};
use super::state::RelayState;
use crate::error::SyncError;
use crate::events::{is_lifecycle_event, Frame};

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<RelayState>) -> Router {
    // Browsers on other origins connect during development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/events", post(publish_event))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Broadcast one wire frame to every connected client
async fn publish_event(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    Json(frame): Json<Frame>,
) -> Result<Response, SyncError> {
    state.authorize(request_token(&headers, &params))?;

    if frame.event.trim().is_empty() || is_lifecycle_event(&frame.event) {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("event name '{}' cannot be published", frame.event) })),
        )
            .into_response());
    }

    let event = frame.event.clone();
    let delivered = state.publish(frame);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event": event, "delivered": delivered })),
    )
        .into_response())
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            SyncError::Serialization(_) | SyncError::Config(_) | SyncError::InvalidUrl(_) => {
                StatusCode::BAD_REQUEST
            }
            SyncError::Api { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            SyncError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::auth::TokenValidator;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn publish_request(body: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(Arc::new(RelayState::default()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_publish_broadcasts() {
        let state = Arc::new(RelayState::default());
        let mut rx = state.subscribe();
        let app = create_router(state.clone());

        let response = app
            .oneshot(publish_request(
                r#"{"event":"new:content","data":{"business":"Acme"}}"#,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "new:content");
        assert_eq!(frame.data["business"], "Acme");
    }

    #[tokio::test]
    async fn test_publish_rejects_lifecycle_names() {
        let app = create_router(Arc::new(RelayState::default()));
        let response = app
            .oneshot(publish_request(r#"{"event":"connect"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_requires_token_when_secured() {
        let validator = TokenValidator::new("http-test-secret-long-enough-for-hs256");
        let token = validator.issue("publisher", 60).unwrap();
        let state = Arc::new(RelayState::new(16, Some(validator)));
        let app = create_router(state);

        let body = r#"{"event":"update:content","data":{}}"#;
        let response = app.clone().oneshot(publish_request(body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(publish_request(body, Some(&format!("Bearer {}", token))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
