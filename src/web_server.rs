use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router, serve,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WebConfig;
use crate::constants;
use crate::conversation::{PendingTurn, Turn};
use crate::credentials::{CredentialName, CredentialResolver, CredentialSource, SessionOverrides};
use crate::render::{self, ChatView};
use crate::router::{self, ServiceProvider, Services};
use crate::session::{SessionStore, SharedSession};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: SessionStore,
    // Credential layers shared by every session, highest priority first
    credential_sources: Arc<Vec<Arc<dyn CredentialSource>>>,
    provider: Arc<dyn ServiceProvider>,
}

impl AppState {
    pub fn new(
        templates_dir: PathBuf,
        credential_sources: Vec<Arc<dyn CredentialSource>>,
        provider: Arc<dyn ServiceProvider>,
    ) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir)),
            sessions: SessionStore::new(),
            credential_sources: Arc::new(credential_sources),
            provider,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Resolves keys for one session and builds its services, if it can.
    fn services_for(&self, overrides: &SessionOverrides) -> Option<Services> {
        let mut sources: Vec<&dyn CredentialSource> =
            self.credential_sources.iter().map(|source| source.as_ref()).collect();
        sources.push(overrides);
        let credentials = CredentialResolver::new(sources).resolve_all();
        self.provider.services(&credentials)
    }
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    // Use AutoReloader for development convenience
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(templates_dir.clone()));
        // Watch the templates directory for changes
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

#[derive(Deserialize)]
struct SendForm {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TopicForm {
    topic: String,
}

#[derive(Deserialize)]
struct CredentialsForm {
    #[serde(default)]
    llm_api_key: String,
    #[serde(default)]
    search_api_key: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StateResponse {
    pub turns: Vec<Turn>,
    pub thinking: bool,
    pub services_available: bool,
}

fn chat_url(id: Uuid) -> String {
    format!("/chat/{}", id)
}

async fn new_session_handler(State(state): State<AppState>) -> Redirect {
    let id = state.sessions.create().await;
    Redirect::to(&chat_url(id))
}

async fn chat_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let Some(session) = state.sessions.get(&id).await else {
        return Redirect::to("/").into_response();
    };

    let view = {
        let mut session = session.lock().await;
        session.touch();
        let services_available = state.services_for(&session.overrides).is_some();
        ChatView::new(id, &session.conversation, services_available)
    };

    // Acquire env, get template, and render
    state
        .templates
        .acquire_env()
        .and_then(|env| render::render_chat(&env, &view))
        .map(|html| Html(html).into_response())
        .unwrap_or_else(|e| {
            error!("Failed to get or render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(format!("Internal Server Error: {}", e))).into_response()
        })
}

async fn send_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<SendForm>,
) -> Redirect {
    submit(&state, id, &form.message).await;
    Redirect::to(&chat_url(id))
}

async fn topic_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<TopicForm>,
) -> Redirect {
    if constants::TOPICS.contains(&form.topic.as_str()) {
        submit(&state, id, &form.topic).await;
    } else {
        warn!(topic = %form.topic, "Ignoring unknown topic");
    }
    Redirect::to(&chat_url(id))
}

async fn reset_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Redirect {
    if let Some(session) = state.sessions.get(&id).await {
        let mut session = session.lock().await;
        session.touch();
        session.reset().await;
        info!(%id, "Conversation reset");
    }
    Redirect::to(&chat_url(id))
}

async fn credentials_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<CredentialsForm>,
) -> Redirect {
    if let Some(session) = state.sessions.get(&id).await {
        let mut session = session.lock().await;
        session.touch();
        for (name, value) in [
            (CredentialName::LlmApiKey, &form.llm_api_key),
            (CredentialName::SearchApiKey, &form.search_api_key),
        ] {
            // Blank fields leave the existing override alone
            if !value.trim().is_empty() {
                session.overrides.set(name, value);
            }
        }
        info!(%id, "Updated session credentials");
    }
    Redirect::to(&chat_url(id))
}

async fn state_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StateResponse>, StatusCode> {
    let session = state.sessions.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let mut session = session.lock().await;
    session.touch();
    Ok(Json(StateResponse {
        turns: session.conversation.turns.clone(),
        thinking: session.conversation.thinking,
        services_available: state.services_for(&session.overrides).is_some(),
    }))
}

/// Stores the user turn and answers it in the background. Submissions are
/// dropped when the text is blank, a reply is pending, or no services are
/// configured.
async fn submit(state: &AppState, id: Uuid, text: &str) {
    let Some(session) = state.sessions.get(&id).await else {
        return;
    };

    let mut guard = session.lock().await;
    guard.touch();
    let Some(services) = state.services_for(&guard.overrides) else {
        info!(%id, "Chat services unavailable, ignoring submission");
        return;
    };
    let pending = match guard.conversation.begin_turn(text) {
        Ok(pending) => pending,
        Err(e) => {
            debug!(%id, "Ignoring submission: {}", e);
            return;
        }
    };

    // Spawned under the lock so a reset always finds the task to cancel
    guard.generation = Some(tokio::spawn(answer(session.clone(), pending, services)));
}

// The session lock is not held while the services are called.
async fn answer(session: SharedSession, pending: PendingTurn, services: Services) {
    let reply = router::respond(&pending.question, &services).await;
    let mut session = session.lock().await;
    let id = session.id;
    if session.conversation.finish_turn(pending, reply) {
        session.generation = None;
        debug!(%id, "Assistant turn appended");
    } else {
        debug!(%id, "Conversation was reset, dropping reply");
    }
}

/// Builds the application router. Exposed so tests can drive it in-process.
pub fn app(state: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/", get(new_session_handler))
        .route("/chat/:id", get(chat_handler))
        .route("/chat/:id/send", post(send_handler))
        .route("/chat/:id/topic", post(topic_handler))
        .route("/chat/:id/reset", post(reset_handler))
        .route("/chat/:id/credentials", post(credentials_handler))
        .route("/chat/:id/state", get(state_handler))
        // Static files live under /static so they never shadow chat routes
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())) // Add request logging
}

pub async fn start_web_server(config: WebConfig, state: AppState) -> Result<()> {
    let sessions = state.sessions.clone();
    let ttl = config.session_ttl;
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval((ttl / 4).max(Duration::from_secs(1)));
        loop {
            sweep.tick().await;
            let evicted = sessions.evict_idle(ttl).await;
            if evicted > 0 {
                info!(evicted, "Dropped idle chat sessions");
            }
        }
    });

    let app = app(state, config.static_dir.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context(format!("Invalid bind address {}:{}", config.bind, config.port))?;
    info!("Web server listening on http://{}", addr);

    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
