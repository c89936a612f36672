use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use empower_chat::config::ServiceConfig;
use empower_chat::constants;
use empower_chat::conversation::Role;
use empower_chat::credentials::{CredentialName, CredentialSource, Credentials};
use empower_chat::llm::{ChatMessage, CompletionClient, LlmError};
use empower_chat::prompt::PromptBuilder;
use empower_chat::router::{HttpServiceProvider, ServiceProvider, Services};
use empower_chat::search::{SearchClient, SearchError, SearchHit};
use empower_chat::web_server::{app, AppState, StateResponse};

struct FakeLlm {
    fail: bool,
    // Each completion consumes one permit, so tests can hold a reply back
    gate: Arc<Semaphore>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

// Counts a completion as in flight until its future finishes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionClient for FakeLlm {
    async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);
        self.prompts.lock().unwrap().push(messages[0].content.clone());
        self.gate.acquire().await.unwrap().forget();
        if self.fail {
            Err(LlmError::EmptyResponse)
        } else {
            Ok("You're unstoppable!".to_string())
        }
    }
}

struct NoHits;

#[async_trait]
impl SearchClient for NoHits {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        Ok(vec![])
    }
}

struct FakeProvider {
    llm: Arc<FakeLlm>,
}

impl ServiceProvider for FakeProvider {
    fn services(&self, credentials: &Credentials) -> Option<Services> {
        if !credentials.is_complete() {
            return None;
        }
        Some(Services {
            llm: self.llm.clone(),
            search: Arc::new(NoHits),
            prompts: Arc::new(PromptBuilder::new().unwrap()),
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
        })
    }
}

struct StaticKeys;

impl CredentialSource for StaticKeys {
    fn lookup(&self, _name: CredentialName) -> Option<String> {
        Some("test-key".to_string())
    }
}

fn manifest_dir(sub: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(sub)
}

fn test_server(sources: Vec<Arc<dyn CredentialSource>>, provider: Arc<dyn ServiceProvider>) -> TestServer {
    let state = AppState::new(manifest_dir("templates"), sources, provider);
    TestServer::new(app(state, manifest_dir("static"))).unwrap()
}

fn fake_llm(fail: bool, permits: usize) -> Arc<FakeLlm> {
    Arc::new(FakeLlm {
        fail,
        gate: Arc::new(Semaphore::new(permits)),
        prompts: Mutex::new(Vec::new()),
        in_flight: AtomicUsize::new(0),
        peak_in_flight: AtomicUsize::new(0),
    })
}

async fn wait_for_prompts(llm: &FakeLlm, count: usize) {
    for _ in 0..200 {
        if llm.prompts.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("completion {} never started", count);
}

fn server_with(llm: Arc<FakeLlm>) -> TestServer {
    test_server(vec![Arc::new(StaticKeys)], Arc::new(FakeProvider { llm }))
}

async fn new_session(server: &TestServer) -> String {
    let response = server.get("/").await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    response.header("location").to_str().unwrap().to_string()
}

async fn state(server: &TestServer, chat: &str) -> StateResponse {
    server.get(&format!("{}/state", chat)).await.json::<StateResponse>()
}

async fn wait_until_idle(server: &TestServer, chat: &str) -> StateResponse {
    for _ in 0..200 {
        let current = state(server, chat).await;
        if !current.thinking {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reply never arrived");
}

#[tokio::test]
async fn test_root_creates_session_and_renders_greeting() {
    let server = server_with(fake_llm(false, 100));
    let chat = new_session(&server).await;
    assert!(chat.starts_with("/chat/"));

    let page = server.get(&chat).await;
    assert_eq!(page.status_code(), StatusCode::OK);
    let html = page.text();
    assert!(html.contains("Women&#x27;s Empowerment Chat") || html.contains("Women's Empowerment Chat"));
    assert!(html.contains("What would you like to chat about today?"));
    assert!(html.contains("Women in STEM"));
    assert!(!html.contains("Typing..."));
    assert!(html.contains("scrollToBottom"));
}

#[tokio::test]
async fn test_send_appends_user_and_assistant_turns() {
    let server = server_with(fake_llm(false, 100));
    let chat = new_session(&server).await;

    let response = server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "I love this!"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(response.header("location").to_str().unwrap(), chat);

    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns.len(), 3);
    assert_eq!(done.turns[1].role, Role::User);
    assert_eq!(done.turns[1].content, "I love this!");
    assert_eq!(done.turns[2].role, Role::Assistant);
    assert_eq!(done.turns[2].content, "You're unstoppable!");
}

#[tokio::test]
async fn test_user_content_is_escaped_in_page() {
    let server = server_with(fake_llm(false, 100));
    let chat = new_session(&server).await;
    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "<script>alert(1)</script>\nbye"}))
        .await;
    wait_until_idle(&server, &chat).await;

    let html = server.get(&chat).await.text();
    assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;<br>bye"));
    assert!(!html.contains("<script>alert(1)"));
}

#[tokio::test]
async fn test_topic_behaves_like_typed_text() {
    let llm = fake_llm(false, 100);
    let server = server_with(llm.clone());
    let chat = new_session(&server).await;

    server
        .post(&format!("{}/topic", chat))
        .form(&json!({"topic": "What is feminism?"}))
        .await;
    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns.len(), 3);
    assert_eq!(done.turns[1].content, "What is feminism?");
    // "what is" routes through search, which found nothing
    assert!(llm.prompts.lock().unwrap()[0].contains("No results found."));

    server
        .post(&format!("{}/topic", chat))
        .form(&json!({"topic": "Something else"}))
        .await;
    assert_eq!(state(&server, &chat).await.turns.len(), 3);
}

#[tokio::test]
async fn test_blank_message_is_ignored() {
    let server = server_with(fake_llm(false, 100));
    let chat = new_session(&server).await;
    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "   "}))
        .await;

    let current = state(&server, &chat).await;
    assert_eq!(current.turns.len(), 1);
    assert!(!current.thinking);
}

#[tokio::test]
async fn test_typing_indicator_and_busy_submissions() {
    let llm = fake_llm(false, 0);
    let server = server_with(llm.clone());
    let chat = new_session(&server).await;

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "first"}))
        .await;
    let html = server.get(&chat).await.text();
    assert!(html.contains("Typing..."));
    assert!(html.contains("http-equiv=\"refresh\""));

    // A second submission while thinking is dropped
    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "second"}))
        .await;
    let pending = state(&server, &chat).await;
    assert!(pending.thinking);
    assert_eq!(pending.turns.len(), 2);

    llm.gate.add_permits(1);
    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns.len(), 3);
    assert_eq!(done.turns[1].content, "first");
}

#[tokio::test]
async fn test_reset_restores_seed_and_drops_late_reply() {
    let llm = fake_llm(false, 0);
    let server = server_with(llm.clone());
    let chat = new_session(&server).await;

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "hello"}))
        .await;
    let response = server.post(&format!("{}/reset", chat)).await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);

    llm.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let current = state(&server, &chat).await;
    assert_eq!(current.turns.len(), 1);
    assert_eq!(current.turns[0].content, constants::GREETING);
    assert!(!current.thinking);
}

#[tokio::test]
async fn test_reset_cancels_pending_generation() {
    let llm = fake_llm(false, 0);
    let server = server_with(llm.clone());
    let chat = new_session(&server).await;

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "one"}))
        .await;
    wait_for_prompts(&llm, 1).await;
    assert_eq!(llm.in_flight.load(Ordering::SeqCst), 1);

    server.post(&format!("{}/reset", chat)).await;
    assert_eq!(llm.in_flight.load(Ordering::SeqCst), 0);

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "two"}))
        .await;
    wait_for_prompts(&llm, 2).await;
    assert_eq!(llm.peak_in_flight.load(Ordering::SeqCst), 1);

    llm.gate.add_permits(1);
    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns.len(), 3);
    assert_eq!(done.turns[1].content, "two");
    assert_eq!(done.turns[2].content, "You're unstoppable!");
    assert_eq!(llm.peak_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_search_failure_shows_search_fallback() {
    struct BrokenSearch;

    #[async_trait]
    impl SearchClient for BrokenSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
            Err(SearchError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    struct BrokenSearchProvider {
        llm: Arc<FakeLlm>,
    }

    impl ServiceProvider for BrokenSearchProvider {
        fn services(&self, _credentials: &Credentials) -> Option<Services> {
            Some(Services {
                llm: self.llm.clone(),
                search: Arc::new(BrokenSearch),
                prompts: Arc::new(PromptBuilder::new().unwrap()),
                model: "test-model".to_string(),
                timeout: Duration::from_secs(5),
            })
        }
    }

    let llm = fake_llm(false, 100);
    let server = test_server(vec![], Arc::new(BrokenSearchProvider { llm: llm.clone() }));
    let chat = new_session(&server).await;
    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "What is feminism?"}))
        .await;

    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns[2].content, constants::SEARCH_FALLBACK);
    assert!(llm.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_failure_shows_fallback() {
    let server = server_with(fake_llm(true, 100));
    let chat = new_session(&server).await;
    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "Equal pay"}))
        .await;

    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns[2].content, constants::PLAIN_FALLBACK);
}

#[tokio::test]
async fn test_missing_keys_disable_chat_until_entered() {
    let llm = fake_llm(false, 100);
    let server = test_server(vec![], Arc::new(FakeProvider { llm }));
    let chat = new_session(&server).await;

    let html = server.get(&chat).await.text();
    assert!(html.contains("Chat is unavailable until API keys are configured."));

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "hello"}))
        .await;
    let current = state(&server, &chat).await;
    assert!(!current.services_available);
    assert_eq!(current.turns.len(), 1);

    server
        .post(&format!("{}/credentials", chat))
        .form(&json!({"llm_api_key": "gsk_typed", "search_api_key": "tvly_typed"}))
        .await;
    assert!(state(&server, &chat).await.services_available);

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "hello"}))
        .await;
    assert_eq!(wait_until_idle(&server, &chat).await.turns.len(), 3);
}

#[tokio::test]
async fn test_unknown_session() {
    let server = server_with(fake_llm(false, 100));
    let missing = format!("/chat/{}", uuid::Uuid::new_v4());

    let page = server.get(&missing).await;
    assert_eq!(page.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(page.header("location").to_str().unwrap(), "/");

    let json = server.get(&format!("{}/state", missing)).await;
    assert_eq!(json.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sessions_do_not_share_turns() {
    let server = server_with(fake_llm(false, 100));
    let first = new_session(&server).await;
    let second = new_session(&server).await;

    server
        .post(&format!("{}/send", first))
        .form(&json!({"message": "only here"}))
        .await;
    wait_until_idle(&server, &first).await;

    assert_eq!(state(&server, &second).await.turns.len(), 1);
}

#[tokio::test]
async fn test_static_stylesheet_served() {
    let server = server_with(fake_llm(false, 100));
    let css = server.get("/static/chat.css").await;
    assert_eq!(css.status_code(), StatusCode::OK);
    assert!(css.text().contains(".user-message"));

    let missing = server.get("/static/nope.css").await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_full_stack_against_mocked_apis() {
    let apis = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"title": "STEM", "url": "https://example.org", "content": "Women hold 28% of STEM jobs."}]
        })))
        .expect(1)
        .mount(&apis)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "More women in STEM means better science for everyone!"}}]
        })))
        .expect(1)
        .mount(&apis)
        .await;

    let provider = HttpServiceProvider::new(ServiceConfig {
        model: "llama3-8b-8192".to_string(),
        groq_url: apis.uri(),
        tavily_url: apis.uri(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();
    let server = test_server(vec![Arc::new(StaticKeys)], Arc::new(provider));
    let chat = new_session(&server).await;

    server
        .post(&format!("{}/send", chat))
        .form(&json!({"message": "Find stats on women in STEM"}))
        .await;
    let done = wait_until_idle(&server, &chat).await;
    assert_eq!(done.turns[2].content, "More women in STEM means better science for everyone!");

    let requests = apis.received_requests().await.unwrap();
    let completion = requests
        .iter()
        .find(|request| request.url.path() == "/openai/v1/chat/completions")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&completion.body).unwrap();
    let prompt = body["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains("help you answer: Women hold 28% of STEM jobs."));
    assert!(prompt.contains("User question: Find stats on women in STEM"));
}
