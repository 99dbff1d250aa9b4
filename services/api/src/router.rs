//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateSessionResponse, ErrorResponse, ProfileView, SessionDetail, SubmitMessagePayload,
        TranscriptEntry, TurnResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::submit_message,
        handlers::get_session,
    ),
    components(
        schemas(CreateSessionResponse, SubmitMessagePayload, TurnResponse, SessionDetail, ProfileView, TranscriptEntry, ErrorResponse)
    ),
    tags(
        (name = "Monica API", description = "Staged coaching role-play sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/messages", post(handlers::submit_message))
        .route("/ws/sessions/{id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Provider};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use monica_core::Orchestrator;
    use monica_core::llm_client::{HistoryTurn, TextGenerator};
    use monica_core::prompts::StagePrompts;
    use monica_core::repository::InMemorySessionRepository;
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::time::Duration;
    use tower::ServiceExt;

    struct CannedGenerator;

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _: &str, _: &[HistoryTurn], _: &str) -> Result<String> {
            Ok("Could you tell me your division?".to_string())
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: None,
            provider: Provider::Gemini,
            openai_api_key: None,
            gemini_api_key: Some("test".into()),
            chat_model: "gemini-2.0-flash".into(),
            live_model: "models/gemini-2.0-flash-exp".into(),
            live_voice: "Puck".into(),
            generation_timeout: Duration::from_secs(1),
            log_level: tracing::Level::INFO,
            prompts_path: PathBuf::from("./prompts"),
            product_name: "Dexel & Dexel ND".into(),
        }
    }

    fn app() -> Router {
        let orchestrator = Orchestrator::standard(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(CannedGenerator),
            StagePrompts::default(),
            "Dexel & Dexel ND",
            Duration::from_secs(1),
        )
        .unwrap();
        create_router(Arc::new(AppState {
            orchestrator,
            live: None,
            config: Arc::new(test_config()),
        }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_create_then_submit_then_inspect() {
        let app = app();
        let (status, created) = send(&app, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["stage"], "SETUP");
        assert_eq!(created["persona"], "COACH");
        let id = created["session_id"].as_str().unwrap().to_string();

        let (status, turn) = send(
            &app,
            "POST",
            &format!("/sessions/{id}/messages"),
            Some(json!({"text": "My name is Asha, I'm a BM"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(turn["reply"], "Could you tell me your division?");
        assert_eq!(turn["stage_advanced"], false);

        let (status, detail) = send(&app, "GET", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["profile"]["name"], "Asha");
        assert_eq!(detail["profile"]["role"], "BM");
        assert_eq!(detail["transcript"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = app();
        let uri = format!("/sessions/{}/messages", uuid::Uuid::new_v4());
        let (status, body) = send(&app, "POST", &uri, Some(json!({"text": "hello"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_blank_utterance_is_400() {
        let app = app();
        let (_, created) = send(&app, "POST", "/sessions", None).await;
        let id = created["session_id"].as_str().unwrap().to_string();
        let (status, _) = send(
            &app,
            "POST",
            &format!("/sessions/{id}/messages"),
            Some(json!({"text": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.contains(&"/sessions".to_string()));
        assert!(paths.contains(&"/sessions/{id}".to_string()));
        assert!(paths.contains(&"/sessions/{id}/messages".to_string()));
    }
}
