// Constants, loaded from the environment where a deployment may want to override them.

use std::env;

// Use lazy_static to initialize static variables safely.
lazy_static::lazy_static! {
    pub static ref GROQ_API_URL: String = env::var("GROQ_API_URL").unwrap_or_else(|_| "https://api.groq.com".to_string());
    pub static ref TAVILY_API_URL: String = env::var("TAVILY_API_URL").unwrap_or_else(|_| "https://api.tavily.com".to_string());
    pub static ref CHAT_MODEL: String = env::var("GROQ_MODEL").unwrap_or_else(|_| "llama3-8b-8192".to_string());
}

/// Number of hits requested from the search API. Only the first is used.
pub const SEARCH_MAX_RESULTS: usize = 3;

/// Search content longer than this (in characters) is cut before it goes into the prompt.
pub const SEARCH_SNIPPET_CHARS: usize = 250;

/// Error descriptions in assistant turns are cut to this many characters.
pub const ERROR_SNIPPET_CHARS: usize = 100;

pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_SECRETS_FILE: &str = "secrets.toml";

pub const APP_TITLE: &str = "Women's Empowerment Chat";

pub const GREETING: &str =
    "Hi there! I'm your women's empowerment chatbot. What would you like to chat about today?";

pub const PLAIN_FALLBACK: &str =
    "Sorry, I couldn't process that. How about asking something else about women's empowerment?";

pub const SEARCH_FALLBACK: &str =
    "Sorry, I couldn't find information on that. How about asking something else about women's empowerment?";

pub const NO_SEARCH_RESULTS: &str = "No results found.";

pub const ERROR_PREFIX: &str = "I'm sorry, I encountered an error: ";

/// Sidebar shortcuts. Each one behaves as if the user typed it.
pub const TOPICS: [&str; 4] = [
    "What is feminism?",
    "Gender equality",
    "Women in STEM",
    "Equal pay",
];

/// Lowercase phrases that mark a question as worth a web search.
pub const SEARCH_TRIGGERS: [&str; 11] = [
    "what is",
    "who is",
    "when did",
    "where is",
    "how to",
    "why do",
    "explain",
    "define",
    "find",
    "search",
    "learn about",
];
