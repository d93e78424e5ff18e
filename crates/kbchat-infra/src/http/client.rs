//! HttpChatBackend -- concrete [`ChatBackend`] implementation over the
//! knowledge-base back-end's REST + SSE API.
//!
//! Endpoints (all under `{base_url}/api`):
//! - `GET/POST /chat/sessions`, `GET/DELETE /chat/sessions/{id}`
//! - `POST /chat/sessions/{id}/messages` -- streamed reply (SSE)
//! - `GET /admin/personas`, `GET /admin/health`

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use kbchat_core::backend::{ChatBackend, FragmentStream};
use kbchat_types::config::ClientConfig;
use kbchat_types::error::ApiError;
use kbchat_types::persona::Persona;
use kbchat_types::session::{NewSession, Session, SessionDetail};

use super::streaming::create_fragment_stream;
use super::types::{HealthReport, SendMessageBody, error_from_status, error_from_transport};

/// Knowledge-base chat back-end reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatBackend {
    /// Build a backend from client configuration.
    ///
    /// The request timeout bounds a whole streamed reply, not just its
    /// first byte.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List personas, for picking one when creating a session.
    pub async fn list_personas(&self) -> Result<Vec<Persona>, ApiError> {
        let response = self.get("/admin/personas").await?;
        read_json(response).await
    }

    /// Back-end component health.
    pub async fn health(&self) -> Result<HealthReport, ApiError> {
        let response = self.get("/admin/health").await?;
        read_json(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        debug!(%url, "GET");
        self.client
            .get(&url)
            .send()
            .await
            .map_err(error_from_transport)
    }
}

impl ChatBackend for HttpChatBackend {
    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let response = self.get("/chat/sessions").await?;
        read_json(response).await
    }

    async fn create_session(&self, request: &NewSession) -> Result<Session, ApiError> {
        let response = self
            .client
            .post(self.url("/chat/sessions"))
            .json(request)
            .send()
            .await
            .map_err(error_from_transport)?;
        read_json(response).await
    }

    async fn delete_session(&self, session_id: &Uuid) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/chat/sessions/{session_id}")))
            .send()
            .await
            .map_err(error_from_transport)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn get_session_detail(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionDetail>, ApiError> {
        let response = self
            .get(&format!("/chat/sessions/{session_id}"))
            .await?;
        match read_json(response).await {
            Ok(detail) => Ok(Some(detail)),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send_message_stream(&self, session_id: Uuid, content: String) -> FragmentStream {
        let request = self
            .client
            .post(self.url(&format!("/chat/sessions/{session_id}/messages")))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&SendMessageBody { content: &content });
        create_fragment_stream(request)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_status(status.as_u16(), &body))
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await.map_err(error_from_transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures_util::StreamExt;
    use serde_json::{Value, json};

    use kbchat_core::controller::{ControllerConfig, ConversationController};
    use kbchat_types::session::MessageRole;
    use kbchat_types::stream::TurnOutcome;

    /// In-memory stand-in for the back-end, speaking its wire format.
    #[derive(Clone, Default)]
    struct FakeBackend {
        sessions: Arc<Mutex<Vec<Value>>>,
        messages: Arc<Mutex<HashMap<String, Vec<Value>>>>,
        reply: Arc<Mutex<Vec<&'static str>>>,
        terminate: Arc<Mutex<bool>>,
    }

    impl FakeBackend {
        fn seed(&self, title: &str) -> Uuid {
            let id = Uuid::now_v7();
            self.sessions.lock().unwrap().push(json!({
                "id": id,
                "title": title,
                "persona_id": null,
                "llm_provider": "ollama",
                "created_at": "2026-03-01T10:00:00Z",
                "updated_at": null,
            }));
            self.messages.lock().unwrap().insert(id.to_string(), Vec::new());
            id
        }

        fn script(&self, fragments: Vec<&'static str>, terminate: bool) {
            *self.reply.lock().unwrap() = fragments;
            *self.terminate.lock().unwrap() = terminate;
        }

        fn find(&self, id: &str) -> Option<Value> {
            self.sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s["id"] == id)
                .cloned()
        }

        fn persist(&self, id: &str, role: &str, content: &str) {
            let chunks = if role == "assistant" {
                json!(["chunk-1", "chunk-2"])
            } else {
                Value::Null
            };
            if let Some(messages) = self.messages.lock().unwrap().get_mut(id) {
                messages.push(json!({
                    "id": Uuid::now_v7(),
                    "session_id": id,
                    "role": role,
                    "content": content,
                    "context_chunks": chunks,
                    "created_at": "2026-03-01T10:00:05Z",
                }));
            }
        }
    }

    fn not_found() -> axum::response::Response {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Session not found" })),
        )
            .into_response()
    }

    async fn list_sessions(State(fake): State<FakeBackend>) -> Json<Vec<Value>> {
        Json(fake.sessions.lock().unwrap().clone())
    }

    async fn create_session(
        State(fake): State<FakeBackend>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let id = fake.seed(body["title"].as_str().unwrap_or("New Chat"));
        let mut session = fake.find(&id.to_string()).unwrap();
        session["persona_id"] = body["persona_id"].clone();
        session["llm_provider"] = body["llm_provider"].clone();
        Json(session)
    }

    async fn get_session(
        State(fake): State<FakeBackend>,
        Path(id): Path<String>,
    ) -> axum::response::Response {
        match fake.find(&id) {
            Some(mut session) => {
                let messages = fake.messages.lock().unwrap().get(&id).cloned().unwrap_or_default();
                session["messages"] = Value::Array(messages);
                Json(session).into_response()
            }
            None => not_found(),
        }
    }

    async fn delete_session(
        State(fake): State<FakeBackend>,
        Path(id): Path<String>,
    ) -> axum::response::Response {
        let mut sessions = fake.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s["id"] != id.as_str());
        if sessions.len() == before {
            return not_found();
        }
        Json(json!({ "message": "Session deleted" })).into_response()
    }

    async fn send_message(
        State(fake): State<FakeBackend>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        if fake.find(&id).is_none() {
            return not_found();
        }
        let content = body["content"].as_str().unwrap_or_default().to_string();
        fake.persist(&id, "user", &content);

        let fragments = fake.reply.lock().unwrap().clone();
        let terminate = *fake.terminate.lock().unwrap();
        let mut sse = String::new();
        for fragment in &fragments {
            sse.push_str(&format!("data: {fragment}\n\n"));
        }
        if terminate {
            fake.persist(&id, "assistant", &fragments.concat());
            sse.push_str("data: [DONE]\n\n");
        }
        ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
    }

    async fn personas() -> Json<Value> {
        Json(json!([{
            "id": "0193b3a0-0000-7000-8000-000000000001",
            "name": "Default",
            "description": "General assistant",
            "system_prompt": "You are helpful.",
            "is_default": true,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": null,
        }]))
    }

    async fn health() -> Json<Value> {
        Json(json!({ "database": "healthy", "ollama": "unhealthy", "embedding_model": "healthy" }))
    }

    async fn spawn_server(fake: FakeBackend) -> HttpChatBackend {
        let app = Router::new()
            .route("/api/chat/sessions", get(list_sessions).post(create_session))
            .route("/api/chat/sessions/{id}", get(get_session).delete(delete_session))
            .route("/api/chat/sessions/{id}/messages", post(send_message))
            .route("/api/admin/personas", get(personas))
            .route("/api/admin/health", get(health))
            .route(
                "/api/broken",
                get(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "detail": "boom" })),
                    )
                }),
            )
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = ClientConfig {
            base_url: format!("http://{addr}/"),
            ..ClientConfig::default()
        };
        HttpChatBackend::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_base_url_trailing_slash_is_trimmed() {
        let backend = HttpChatBackend::with_client(reqwest::Client::new(), "http://kb.local:8000/");
        assert_eq!(backend.base_url(), "http://kb.local:8000");
        assert_eq!(backend.url("/chat/sessions"), "http://kb.local:8000/api/chat/sessions");
    }

    #[tokio::test]
    async fn test_session_crud_round_trip() {
        let fake = FakeBackend::default();
        let backend = spawn_server(fake.clone()).await;
        assert!(backend.list_sessions().await.unwrap().is_empty());

        let created = backend
            .create_session(&NewSession {
                title: None,
                persona_id: None,
                llm_provider: "azure_openai".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(created.title, "New Chat");
        assert_eq!(created.llm_provider, "azure_openai");

        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);

        let detail = backend.get_session_detail(&created.id).await.unwrap().unwrap();
        assert_eq!(detail.session.id, created.id);
        assert!(detail.messages.is_empty());

        backend.delete_session(&created.id).await.unwrap();
        assert!(backend.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_detail_is_none() {
        let backend = spawn_server(FakeBackend::default()).await;
        let detail = backend.get_session_detail(&Uuid::now_v7()).await.unwrap();
        assert!(detail.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_session_is_not_found() {
        let backend = spawn_server(FakeBackend::default()).await;
        let err = backend.delete_session(&Uuid::now_v7()).await.unwrap_err();
        assert_eq!(err, ApiError::NotFound);
    }

    #[tokio::test]
    async fn test_server_error_uses_detail() {
        let backend = spawn_server(FakeBackend::default()).await;
        let response = backend.get("/broken").await.unwrap();
        let err = read_json::<Value>(response).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 500,
                message: "boom".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend =
            HttpChatBackend::with_client(reqwest::Client::new(), &format!("http://{addr}"));
        let err = backend.list_sessions().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_send_streams_fragments() {
        let fake = FakeBackend::default();
        let id = fake.seed("s");
        fake.script(vec!["Hi", " there"], true);
        let backend = spawn_server(fake.clone()).await;

        let items: Vec<_> = backend
            .send_message_stream(id, "Hello".to_string())
            .collect()
            .await;
        assert_eq!(items, vec![Ok("Hi".to_string()), Ok(" there".to_string())]);

        let detail = backend.get_session_detail(&id).await.unwrap().unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].role, MessageRole::Assistant);
        assert_eq!(detail.messages[1].source_count(), 2);
    }

    #[tokio::test]
    async fn test_send_to_missing_session_fails_stream() {
        let backend = spawn_server(FakeBackend::default()).await;
        let items: Vec<_> = backend
            .send_message_stream(Uuid::now_v7(), "Hello".to_string())
            .collect()
            .await;
        assert_eq!(items, vec![Err(ApiError::NotFound)]);
    }

    #[tokio::test]
    async fn test_personas_and_health() {
        let backend = spawn_server(FakeBackend::default()).await;

        let personas = backend.list_personas().await.unwrap();
        assert_eq!(personas.len(), 1);
        assert!(personas[0].is_default);

        let report = backend.health().await.unwrap();
        assert!(!report.is_healthy());
        assert_eq!(report.components["database"], "healthy");
    }

    #[tokio::test]
    async fn test_controller_turn_over_http() {
        let fake = FakeBackend::default();
        let id = fake.seed("s");
        fake.script(vec!["Hi", " there"], true);
        let backend = Arc::new(spawn_server(fake.clone()).await);
        let ctl = ConversationController::new(backend, ControllerConfig::default());

        ctl.list_sessions().await.unwrap();
        ctl.select_session(id);
        let outcome = ctl.send("Hello").unwrap().outcome().await;

        assert_eq!(outcome, TurnOutcome::Completed { text: "Hi there".into() });
        let transcript = ctl.cached_transcript(&id);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "Hello");
        assert_eq!(transcript[1].content, "Hi there");
        assert!(ctl.streaming_text(&id).is_empty());
    }

    #[tokio::test]
    async fn test_controller_turn_without_terminator_fails() {
        let fake = FakeBackend::default();
        let id = fake.seed("s");
        fake.script(vec!["Hal"], false);
        let backend = Arc::new(spawn_server(fake.clone()).await);
        let ctl = ConversationController::new(backend, ControllerConfig::default());

        let outcome = ctl.send_to(id, "Hello").unwrap().outcome().await;

        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        assert!(ctl.failure_notice(&id).is_some());
        let transcript = ctl.cached_transcript(&id);
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, MessageRole::User);
    }
}
