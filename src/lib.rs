pub mod chat;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod credentials;
pub mod llm;
pub mod prompt;
pub mod render;
pub mod router;
pub mod search;
pub mod session;
pub mod web_server;
