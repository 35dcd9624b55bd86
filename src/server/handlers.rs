// HTTP request handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use super::session::{SessionTracker, StreamSession};
use crate::config::StreamConfig;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub stream: StreamConfig,
    pub sessions: SessionTracker,
}

/// Create the application router
///
/// Requests are traced and panics are turned into 500 responses.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chunked", get(stream_chunked))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Handle GET /chunked - incrementally streamed HTML
///
/// Status and headers are committed before the first fragment; the body has
/// no length and goes out with chunked transfer encoding.
pub async fn stream_chunked(State(state): State<AppState>) -> Response {
    let session = StreamSession::new(&state.stream, &state.sessions);
    tracing::info!(
        session = session.id(),
        active_sessions = state.sessions.active_count(),
        "Streaming session started"
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html")],
        Body::from_stream(session.into_stream()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use crate::server::session::expected_body;

    fn test_state(fragments: usize) -> AppState {
        AppState {
            stream: StreamConfig {
                fragments,
                interval_ms: 0,
            },
            sessions: SessionTracker::new(),
        }
    }

    #[tokio::test]
    async fn test_chunked_response_shape() {
        let state = test_state(10);
        let sessions = state.sessions.clone();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/chunked").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, expected_body(10).as_bytes());
        assert_eq!(sessions.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let app = create_router(test_state(1));

        let response = app
            .clone()
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/chunked")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
