//! View model and HTML rendering for the chat page.

use minijinja::Environment;
use serde::Serialize;
use uuid::Uuid;

use crate::constants;
use crate::conversation::{ConversationState, Role, Turn};

pub const CHAT_TEMPLATE: &str = "index.html";

/// Escapes `& < > " '` and turns newlines into `<br>`.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '\n' => escaped.push_str("<br>"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Serialize)]
pub struct TurnView {
    pub css_class: &'static str,
    pub align: &'static str,
    /// Already escaped; rendered with `|safe`.
    pub content_html: String,
    pub timestamp: String,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        let (css_class, align) = match turn.role {
            Role::User => ("user-message", "flex-end"),
            Role::Assistant => ("bot-message", "flex-start"),
        };
        Self {
            css_class,
            align,
            content_html: escape_html(&turn.content),
            timestamp: turn.timestamp.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatView {
    pub title: &'static str,
    pub session_id: String,
    pub turns: Vec<TurnView>,
    pub thinking: bool,
    pub services_available: bool,
    pub topics: &'static [&'static str],
}

impl ChatView {
    pub fn new(session_id: Uuid, state: &ConversationState, services_available: bool) -> Self {
        Self {
            title: constants::APP_TITLE,
            session_id: session_id.to_string(),
            turns: state.turns.iter().map(TurnView::from).collect(),
            thinking: state.thinking,
            services_available,
            topics: &constants::TOPICS,
        }
    }
}

pub fn render_chat(env: &Environment<'_>, view: &ChatView) -> Result<String, minijinja::Error> {
    env.get_template(CHAT_TEMPLATE)?.render(view)
}
