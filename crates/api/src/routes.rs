use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use extract::{
    AskError, ChatSession, ChatTurn, ExtractionClient, ExtractionError, FieldSpec, Row,
    SchemaBuilder, SchemaError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub struct AppState {
    pub client: Arc<dyn ExtractionClient>,
    pub api_key_configured: bool,
    pub chat: Mutex<Chat>,
}

/// Per-user state: the schema being edited and the conversation so far.
pub struct Chat {
    pub session: ChatSession,
    pub schema: SchemaBuilder,
}

impl AppState {
    pub fn new(client: Arc<dyn ExtractionClient>, api_key_configured: bool, schema: SchemaBuilder) -> Self {
        Self {
            client,
            api_key_configured,
            chat: Mutex::new(Chat {
                session: ChatSession::new(),
                schema,
            }),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/schema", get(get_schema).delete(clear_schema))
        .route("/schema/fields", post(add_field))
        .route("/schema/fields/:name", delete(remove_field))
        .route("/ask", post(ask))
        .route("/history", get(get_history))
        .route("/reset", post(reset_chat))
        .route("/export/:format", get(export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub enum ApiError {
    Schema(SchemaError),
    Ask(AskError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<SchemaError> for ApiError {
    fn from(e: SchemaError) -> Self {
        ApiError::Schema(e)
    }
}

impl From<AskError> for ApiError {
    fn from(e: AskError) -> Self {
        ApiError::Ask(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Schema(e @ SchemaError::DuplicateField { .. }) => (StatusCode::CONFLICT, e.to_string()),
            ApiError::Schema(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Ask(AskError::Extraction(e)) => {
                let status = match &e {
                    ExtractionError::InvalidUrl { .. } | ExtractionError::EmptyPrompt => StatusCode::BAD_REQUEST,
                    ExtractionError::Auth(_) => StatusCode::UNAUTHORIZED,
                    ExtractionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    ExtractionError::Upstream { .. }
                    | ExtractionError::MalformedResponse(_)
                    | ExtractionError::Transport(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            ApiError::Ask(AskError::Formatting(e)) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "api_key_configured": state.api_key_configured,
    }))
}

#[derive(Serialize)]
struct SchemaView {
    fields: Vec<FieldSpec>,
    max_fields: Option<usize>,
    /// What would be sent to the service right now
    json_schema: Option<Value>,
}

impl SchemaView {
    fn of(schema: &SchemaBuilder) -> Self {
        Self {
            fields: schema.fields().to_vec(),
            max_fields: schema.max_fields(),
            json_schema: schema.compile().map(|c| c.to_json_schema()),
        }
    }
}

#[derive(Deserialize)]
struct AddFieldRequest {
    name: String,
    #[serde(rename = "type", default = "default_type")]
    field_type: String,
    #[serde(default = "default_required")]
    required: bool,
}

fn default_type() -> String {
    "string".to_string()
}

fn default_required() -> bool {
    true
}

async fn get_schema(State(state): State<Arc<AppState>>) -> Json<SchemaView> {
    let chat = state.chat.lock().await;
    Json(SchemaView::of(&chat.schema))
}

async fn add_field(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFieldRequest>,
) -> Result<(StatusCode, Json<SchemaView>), ApiError> {
    let mut chat = state.chat.lock().await;
    chat.schema.add_field(&req.name, &req.field_type, req.required)?;

    Ok((StatusCode::CREATED, Json(SchemaView::of(&chat.schema))))
}

async fn remove_field(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> StatusCode {
    let mut chat = state.chat.lock().await;
    chat.schema.remove_field(&name);
    StatusCode::NO_CONTENT
}

async fn clear_schema(State(state): State<Arc<AppState>>) -> StatusCode {
    state.chat.lock().await.schema.clear();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct AskRequest {
    url: String,
    query: String,
}

#[derive(Serialize)]
struct AskResponse {
    turn_id: Uuid,
    markdown: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    // Held for the whole call: one request in flight per session.
    let mut chat = state.chat.lock().await;
    let Chat { session, schema } = &mut *chat;

    let result = session
        .ask(&req.url, &req.query, state.client.as_ref(), schema)
        .await?;
    let turn_id = session
        .last_turn()
        .map(|t| t.id)
        .ok_or_else(|| ApiError::Internal("turn was not recorded".to_string()))?;

    Ok(Json(AskResponse {
        turn_id,
        markdown: session.formatter().to_markdown(&result.table),
        columns: result.table.columns,
        rows: result.table.rows,
    }))
}

async fn get_history(State(state): State<Arc<AppState>>) -> Json<Vec<ChatTurn>> {
    let chat = state.chat.lock().await;
    Json(chat.session.history().to_vec())
}

async fn reset_chat(State(state): State<Arc<AppState>>) -> StatusCode {
    state.chat.lock().await.session.reset();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct ExportQuery {
    turn: Option<Uuid>,
}

async fn export(
    State(state): State<Arc<AppState>>,
    Path(format): Path<String>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let chat = state.chat.lock().await;
    let session = &chat.session;

    let result = match params.turn {
        Some(id) => session
            .turn(id)
            .ok_or_else(|| ApiError::NotFound(format!("no turn {}", id)))?
            .result()
            .ok_or_else(|| ApiError::NotFound(format!("turn {} has no result", id)))?,
        None => session
            .latest_result()
            .ok_or_else(|| ApiError::NotFound("nothing to export yet".to_string()))?,
    };

    let formatter = session.formatter();
    let (bytes, content_type, file_name) = match format.as_str() {
        "json" => (formatter.to_json_bytes(&result.table), "application/json", "extracted_data.json"),
        "csv" => (formatter.to_csv_bytes(&result.table), "text/csv", "extracted_data.csv"),
        "raw" => (formatter.to_raw_json_bytes(&result.raw), "application/json", "extracted_raw.json"),
        other => return Err(ApiError::BadRequest(format!("unknown export format '{}'", other))),
    };
    let bytes = bytes.map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use extract::SchemaContract;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FixedClient(Value);

    #[async_trait]
    impl ExtractionClient for FixedClient {
        async fn extract(
            &self,
            url: &str,
            prompt: &str,
            _schema: Option<&SchemaContract>,
        ) -> Result<Value, ExtractionError> {
            extract::validate_request(url, prompt)?;
            Ok(self.0.clone())
        }
    }

    struct SlowClient;

    #[async_trait]
    impl ExtractionClient for SlowClient {
        async fn extract(
            &self,
            _url: &str,
            _prompt: &str,
            _schema: Option<&SchemaContract>,
        ) -> Result<Value, ExtractionError> {
            Err(ExtractionError::Timeout {
                after: Duration::from_secs(120),
            })
        }
    }

    fn app(payload: Value) -> Router {
        let state = AppState::new(Arc::new(FixedClient(payload)), true, SchemaBuilder::with_limit(5));
        router(Arc::new(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn as_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_schema_editing() {
        let app = app(json!({}));

        let (status, body) = send(&app, "POST", "/schema/fields", Some(json!({"name": "price", "type": "float"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(as_json(&body)["json_schema"]["properties"]["price"]["type"], "number");

        let (status, body) = send(&app, "POST", "/schema/fields", Some(json!({"name": "price", "type": "int"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(as_json(&body)["error"].as_str().unwrap().contains("price"));

        let (status, _) = send(&app, "POST", "/schema/fields", Some(json!({"name": "when", "type": "date"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", "/schema/fields/price", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", "/schema", None).await;
        let view = as_json(&body);
        assert_eq!(view["fields"], json!([]));
        assert_eq!(view["json_schema"], Value::Null);
    }

    #[tokio::test]
    async fn test_ask_history_export_reset() {
        let app = app(json!({"title": "Acme | Co", "price": "19.99"}));
        send(&app, "POST", "/schema/fields", Some(json!({"name": "title", "type": "str"}))).await;
        send(&app, "POST", "/schema/fields", Some(json!({"name": "price", "type": "float"}))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/ask",
            Some(json!({"url": "https://acme.example", "query": "What do they sell?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let answer = as_json(&body);
        assert_eq!(answer["rows"][0]["price"], json!(19.99));
        assert!(answer["markdown"].as_str().unwrap().contains("Acme \\| Co"));

        let (status, body) = send(&app, "GET", "/export/csv", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "title,price\nAcme | Co,19.99\n");

        let (_, body) = send(&app, "GET", "/export/json", None).await;
        assert_eq!(as_json(&body), json!({"title": "Acme | Co", "price": 19.99}));

        let (_, body) = send(&app, "GET", "/export/raw", None).await;
        assert_eq!(as_json(&body)["price"], "19.99");

        let (status, _) = send(&app, "GET", "/export/xml", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/reset", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&app, "GET", "/history", None).await;
        assert_eq!(as_json(&body), json!([]));
        let (_, body) = send(&app, "GET", "/schema", None).await;
        assert_eq!(as_json(&body)["fields"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/export/json", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_ask_is_recorded() {
        let app = app(json!({}));
        send(&app, "POST", "/schema/fields", Some(json!({"name": "title", "type": "string"}))).await;

        let (status, _) = send(&app, "POST", "/ask", Some(json!({"url": "not a url", "query": "q"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "POST", "/ask", Some(json!({"url": "https://a.example", "query": "q"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(as_json(&body)["error"].as_str().unwrap().contains("title"));

        let (_, body) = send(&app, "GET", "/history", None).await;
        let history = as_json(&body);
        assert_eq!(history.as_array().unwrap().len(), 2);
        assert_eq!(history[1]["outcome"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_timeout_is_gateway_timeout() {
        let state = AppState::new(Arc::new(SlowClient), true, SchemaBuilder::with_limit(5));
        let app = router(Arc::new(state));

        let (status, body) = send(&app, "POST", "/ask", Some(json!({"url": "https://a.example", "query": "q"}))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(as_json(&body)["error"].as_str().unwrap().contains("timed out"));

        let (_, body) = send(&app, "GET", "/history", None).await;
        assert_eq!(as_json(&body)[0]["outcome"]["status"], "failed");
    }
}
