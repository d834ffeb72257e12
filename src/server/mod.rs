mod error;
mod markdown;
mod session_store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::{
        Html,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt as _};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub use error::ApiError;
pub use markdown::render_markdown;
pub use session_store::{DEFAULT_SESSION_IDLE_SECS, SessionStore, SharedConversation};

use crate::{
    chat::{GenerationStats, TurnEvent, TurnOrchestrator},
    constants::PAGE_TITLE,
    utils::log,
    value::Message,
};

pub const SESSION_HEADER: &str = "x-session-id";

const INDEX_TEMPLATE: &str = include_str!("index.html.j2");

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<TurnOrchestrator>,
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(orchestrator: TurnOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    pub fn with_session_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = Arc::new(sessions);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/messages", get(messages))
        .route("/api/chat", post(chat))
        .route("/api/clear", post(clear))
        .with_state(state)
}

/// The browser session a request belongs to, read from the `x-session-id` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(SESSION_HEADER)
            .ok_or(ApiError::MissingSession)?;
        value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(SessionId)
            .ok_or(ApiError::InvalidSession)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// A message together with its markdown rendering.
#[derive(Debug, Serialize)]
pub struct RenderedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub html: String,
}

impl From<Message> for RenderedMessage {
    fn from(message: Message) -> Self {
        let html = render_markdown(message.content());
        Self { message, html }
    }
}

/// One server-sent event of `/api/chat`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent<'a> {
    /// Text added to the reply since the previous event.
    Delta { content: &'a str },
    Finished {
        message: RenderedMessage,
        stats: GenerationStats,
    },
}

pub fn render_index() -> anyhow::Result<String> {
    let env = Environment::new();
    let page = env.render_named_str(
        "index.html.j2",
        INDEX_TEMPLATE,
        context!(title => PAGE_TITLE, session_header => SESSION_HEADER),
    )?;
    Ok(page)
}

async fn index() -> Result<Html<String>, ApiError> {
    Ok(Html(render_index()?))
}

async fn messages(
    State(state): State<AppState>,
    SessionId(id): SessionId,
) -> Json<Vec<RenderedMessage>> {
    let messages = match state.sessions.get(&id) {
        Some(conversation) => conversation.lock().await.messages().to_vec(),
        None => Vec::new(),
    };
    Json(messages.into_iter().map(RenderedMessage::from).collect())
}

async fn clear(State(state): State<AppState>, SessionId(id): SessionId) -> StatusCode {
    if let Some(conversation) = state.sessions.get(&id) {
        conversation.lock().await.clear();
        log::debug(format!("Cleared session {id}"));
    }
    StatusCode::NO_CONTENT
}

async fn chat(
    State(state): State<AppState>,
    SessionId(id): SessionId,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let conversation = state.sessions.get_or_create(id);
    let orchestrator = state.orchestrator.clone();
    let strm = async_stream::stream! {
        let mut conversation = conversation.lock_owned().await;
        let mut turn = orchestrator.handle_user_turn(&mut conversation, req.message);
        let mut sent = 0;
        while let Some(event) = turn.next().await {
            match event {
                Ok(TurnEvent::Partial { content }) => {
                    let delta = ChatEvent::Delta { content: &content[sent..] };
                    sent = content.len();
                    yield Event::default().json_data(delta);
                }
                Ok(TurnEvent::Finished { message, stats }) => {
                    let finished = ChatEvent::Finished { message: message.into(), stats };
                    yield Event::default().json_data(finished);
                }
                Err(e) => {
                    log::error(format!("Turn failed for session {id}: {e:#}"));
                    yield Event::default()
                        .event("error")
                        .json_data(json!({ "message": format!("{e:#}") }));
                    break;
                }
            }
        }
    };
    Sse::new(strm).keep_alive(KeepAlive::default())
}
