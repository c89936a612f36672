//! Decides how each user turn is answered and turns every failure into a
//! fixed assistant reply.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::constants;
use crate::conversation::ConversationState;
use crate::credentials::Credentials;
use crate::llm::{ChatMessage, CompletionClient, GroqClient, LlmError};
use crate::prompt::{self, PromptBuilder};
use crate::search::{SearchClient, SearchError, TavilyClient};

/// Keyword heuristic for "this looks like an informational question".
/// Approximate intent classification, nothing more.
pub fn needs_search(text: &str) -> bool {
    let lowercase = text.to_lowercase();
    constants::SEARCH_TRIGGERS
        .iter()
        .any(|phrase| lowercase.contains(phrase))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Plain,
    Search,
}

impl Route {
    pub fn for_question(question: &str) -> Self {
        if needs_search(question) {
            Route::Search
        } else {
            Route::Plain
        }
    }

    pub fn fallback_text(self) -> &'static str {
        match self {
            Route::Plain => constants::PLAIN_FALLBACK,
            Route::Search => constants::SEARCH_FALLBACK,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
    #[error("completion failed: {0}")]
    Completion(#[from] LlmError),
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    #[error("failed to render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
}

impl GenerationError {
    /// Failures of the outbound services, answered with the route's fallback text.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            GenerationError::Search(_) | GenerationError::Completion(_) | GenerationError::TimedOut(_)
        )
    }
}

/// Handles to the external services one session talks to.
pub struct Services {
    pub llm: Arc<dyn CompletionClient>,
    pub search: Arc<dyn SearchClient>,
    pub prompts: Arc<PromptBuilder>,
    pub model: String,
    pub timeout: Duration,
}

impl Services {
    #[instrument(skip(self))]
    pub async fn generate_plain(&self, question: &str) -> Result<String, GenerationError> {
        let prompt = self.prompts.plain(question)?;
        let reply = self.llm.complete(&self.model, &[ChatMessage::user(prompt)]).await?;
        Ok(reply)
    }

    #[instrument(skip(self))]
    pub async fn generate_with_search(&self, question: &str) -> Result<String, GenerationError> {
        let hits = self.search.search(question, constants::SEARCH_MAX_RESULTS).await?;
        let search_result = prompt::search_context(&hits);
        debug!(%search_result, "Search context for prompt");

        let prompt = self.prompts.with_search(question, &search_result)?;
        let reply = self.llm.complete(&self.model, &[ChatMessage::user(prompt)]).await?;
        Ok(reply)
    }

    pub async fn generate(&self, route: Route, question: &str) -> Result<String, GenerationError> {
        let generation = async {
            match route {
                Route::Plain => self.generate_plain(question).await,
                Route::Search => self.generate_with_search(question).await,
            }
        };
        tokio::time::timeout(self.timeout, generation)
            .await
            .unwrap_or(Err(GenerationError::TimedOut(self.timeout)))
    }
}

/// Builds [`Services`] from whatever credentials were resolved.
pub trait ServiceProvider: Send + Sync {
    /// `None` when a key is missing: the chat is disabled, not broken.
    fn services(&self, credentials: &Credentials) -> Option<Services>;
}

/// Groq for completions, Tavily for search.
pub struct HttpServiceProvider {
    http: reqwest::Client,
    prompts: Arc<PromptBuilder>,
    config: ServiceConfig,
}

impl HttpServiceProvider {
    pub fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            prompts: Arc::new(PromptBuilder::new()?),
            config,
        })
    }
}

impl ServiceProvider for HttpServiceProvider {
    fn services(&self, credentials: &Credentials) -> Option<Services> {
        let llm_key = credentials.llm_key.clone()?;
        let search_key = credentials.search_key.clone()?;
        Some(Services {
            llm: Arc::new(GroqClient::new(self.http.clone(), llm_key, &self.config.groq_url)),
            search: Arc::new(TavilyClient::new(self.http.clone(), search_key, &self.config.tavily_url)),
            prompts: self.prompts.clone(),
            model: self.config.model.clone(),
            timeout: self.config.request_timeout,
        })
    }
}

/// Assistant text for an error that is not a service failure.
pub fn error_reply(error: &dyn std::fmt::Display) -> String {
    let description = prompt::truncate_chars(&error.to_string(), constants::ERROR_SNIPPET_CHARS);
    format!("{}{}...", constants::ERROR_PREFIX, description)
}

/// Produces the assistant reply for `question`. Never fails: every error
/// is mapped to text. Callers without services produce no turn at all.
pub async fn respond(question: &str, services: &Services) -> String {
    let route = Route::for_question(question);
    info!(?route, "Routing user turn");

    match services.generate(route, question).await {
        Ok(reply) => reply,
        Err(e) if e.is_service_failure() => {
            warn!("Generation failed on {:?} route: {}", route, e);
            route.fallback_text().to_string()
        }
        Err(e) => {
            warn!("Unexpected error while answering: {}", e);
            error_reply(&e)
        }
    }
}

/// Answers the most recent user turn in place. Always leaves `thinking`
/// false and appends exactly one assistant turn when a user turn exists.
pub async fn handle_turn(state: &mut ConversationState, services: &Services) {
    let Some(question) = state.last_user_turn().map(|turn| turn.content.clone()) else {
        state.thinking = false;
        return;
    };

    let reply = respond(&question, services).await;
    state.append_assistant(reply);
    state.thinking = false;
}
