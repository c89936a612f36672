use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

/// Where the outbound services live and how long to wait for them.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model: String,
    pub groq_url: String,
    pub tavily_url: String,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model: constants::CHAT_MODEL.clone(),
            groq_url: constants::GROQ_API_URL.clone(),
            tavily_url: constants::TAVILY_API_URL.clone(),
            request_timeout: Duration::from_secs(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub bind: String,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session_ttl: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: constants::DEFAULT_PORT,
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
            session_ttl: Duration::from_secs(constants::DEFAULT_SESSION_TTL_SECS),
        }
    }
}
