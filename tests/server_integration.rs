//! End-to-end tests for the HTTP API.
//!
//! Each test starts the real server on a free port with its upstreams
//! (chat completions, email API) pointed at a wiremock server.

use serde_json::{json, Value};
use site_assist::config::{Config, DEFAULT_APOLOGY};
use site_assist::{db, jobs, migrate, server};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(tmp: &TempDir, port: u16, upstream: &str) -> Config {
    let root = tmp.path().display();
    let config_content = format!(
        r#"[db]
path = "{root}/data/site.sqlite"

[server]
bind = "127.0.0.1:{port}"

[chat]
url = "{upstream}/v1"
api_key = "sk-test"

[handoff]
agent_names = ["Sarah"]
connect_delay_ms = 100
intro_delay_ms = 150

[forms]
upload_dir = "{root}/uploads"
max_submissions = 2

[mailer]
provider = "http"
url = "{upstream}"
api_key = "re_test"
to = ["team@example.com"]
"#
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    base: String,
    cfg: Config,
    handle: JoinHandle<()>,
    _tmp: TempDir,
}

impl TestServer {
    async fn start(upstream: &MockServer) -> Self {
        Self::start_with(upstream, |_| async {}).await
    }

    /// Run `seed` against the migrated database before the server starts.
    async fn start_with<F, Fut>(upstream: &MockServer, seed: F) -> Self
    where
        F: FnOnce(sqlx::SqlitePool) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let tmp = TempDir::new().unwrap();
        let port = find_free_port();
        let cfg = test_config(&tmp, port, &upstream.uri());

        migrate::run_migrations(&cfg).await.unwrap();
        seed(db::connect(&cfg).await.unwrap()).await;

        let cfg_clone = cfg.clone();
        let handle = tokio::spawn(async move {
            server::run_server(&cfg_clone).await.ok();
        });
        wait_for_server(port).await;

        Self {
            base: format!("http://127.0.0.1:{}", port),
            cfg,
            handle,
            _tmp: tmp,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn count(&self, table: &str) -> i64 {
        let pool = db::connect(&self.cfg).await.unwrap();
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn completion_body(content: &str) -> Value {
    json!({
        "choices": [ { "message": { "role": "assistant", "content": content } } ]
    })
}

fn valid_contact() -> Value {
    json!({
        "name": "Jane Doe",
        "email": "jane@example.com",
        "message": "I'd like a quote for a web app.",
        "consent": true
    })
}

async fn open_session(client: &reqwest::Client, srv: &TestServer) -> String {
    let resp = client.post(srv.url("/chat/sessions")).send().await.unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn send(client: &reqwest::Client, srv: &TestServer, id: &str, text: &str) -> Value {
    let resp = client
        .post(srv.url(&format!("/chat/sessions/{}/messages", id)))
        .json(&json!({ "text": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

// ─── Health ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_version() {
    let upstream = MockServer::start().await;
    let srv = TestServer::start(&upstream).await;

    let body: Value = reqwest::get(srv.url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// ─── Forms ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_contact_form_stored_and_notified() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
        .expect(1)
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(srv.url("/contact"))
        .json(&valid_contact())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["notified"], true);
    assert_eq!(srv.count("inquiries").await, 1);
}

#[tokio::test]
async fn test_contact_without_consent_is_rejected_without_side_effects() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
        .expect(0)
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;

    let mut form = valid_contact();
    form["consent"] = json!(false);
    let resp = reqwest::Client::new()
        .post(srv.url("/contact"))
        .json(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation");
    let fields: Vec<&str> = body["error"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["consent"]);
    assert_eq!(srv.count("inquiries").await, 0);
}

#[tokio::test]
async fn test_notification_failure_still_succeeds() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(srv.url("/training-inquiries"))
        .json(&json!({
            "name": "Ravi K",
            "email": "ravi@example.com",
            "course": "Cloud Fundamentals",
            "consent": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["notified"], false);
    assert_eq!(srv.count("inquiries").await, 1);
}

#[tokio::test]
async fn test_spam_and_rate_limit() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();

    let mut spam = valid_contact();
    spam["website"] = json!("http://cheap-pills.example");
    let resp = client.post(srv.url("/contact")).json(&spam).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "spam");

    for _ in 0..2 {
        let resp = client
            .post(srv.url("/contact"))
            .json(&valid_contact())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }
    let resp = client
        .post(srv.url("/contact"))
        .json(&valid_contact())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(srv.count("inquiries").await, 2);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let upstream = MockServer::start().await;
    let srv = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(srv.url("/contact"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

// ─── Jobs ───────────────────────────────────────────────────────────

async fn seed_ai_engineer(pool: sqlx::SqlitePool) {
    jobs::create_job(
        &pool,
        &jobs::NewJob {
            title: "AI Engineer".to_string(),
            description: "Build retrieval-augmented assistants.".to_string(),
            location: "Remote".to_string(),
            employment_type: "Full-time".to_string(),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_jobs_listing_and_application() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_2" })))
        .expect(1)
        .mount(&upstream)
        .await;
    let srv = TestServer::start_with(&upstream, seed_ai_engineer).await;
    let client = reqwest::Client::new();

    let jobs: Value = client.get(srv.url("/jobs")).send().await.unwrap().json().await.unwrap();
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["slug"], "ai-engineer");

    let resp = client.get(srv.url("/jobs/ai-engineer")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.get(srv.url("/jobs/astronaut")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    use base64::Engine;
    let application = json!({
        "name": "Sam Lee",
        "email": "sam@example.com",
        "cover_letter": "I have shipped retrieval-augmented assistants to production twice.",
        "resume": {
            "filename": "cv.pdf",
            "content_base64": base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.7")
        }
    });
    let resp = client
        .post(srv.url("/jobs/ai-engineer/applications"))
        .json(&application)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(srv.count("job_applications").await, 1);

    let resp = client
        .post(srv.url("/jobs/astronaut/applications"))
        .json(&application)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_large_resume_accepted_and_oversize_reported_as_validation() {
    use base64::Engine;
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_3" })))
        .mount(&upstream)
        .await;
    let srv = TestServer::start_with(&upstream, seed_ai_engineer).await;
    let client = reqwest::Client::new();

    let application = |bytes: &[u8]| {
        json!({
            "name": "Sam Lee",
            "email": "sam@example.com",
            "cover_letter": "I have shipped retrieval-augmented assistants to production twice.",
            "resume": {
                "filename": "cv.pdf",
                "content_base64": base64::engine::general_purpose::STANDARD.encode(bytes)
            }
        })
    };

    let mut resume = b"%PDF-1.7\n".to_vec();
    resume.resize(3 * 1024 * 1024, b'x');
    let resp = client
        .post(srv.url("/jobs/ai-engineer/applications"))
        .json(&application(&resume))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(srv.count("job_applications").await, 1);

    resume.resize(srv.cfg.forms.resume_max_bytes + 1, b'x');
    let resp = client
        .post(srv.url("/jobs/ai-engineer/applications"))
        .json(&application(&resume))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["fields"][0]["field"], "resume");
    assert_eq!(srv.count("job_applications").await, 1);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_rag_chat_without_embeddings() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("We offer cloud and AI training.")),
        )
        .expect(1)
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(srv.url("/rag-chat"))
        .json(&json!({
            "message": "What training do you offer?",
            "history": [ { "role": "user", "content": "hi" } ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "We offer cloud and AI training.");
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn test_rag_chat_rejects_empty_message() {
    let upstream = MockServer::start().await;
    let srv = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(srv.url("/rag-chat"))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ─── Chat sessions ──────────────────────────────────────────────────

#[tokio::test]
async fn test_greeting_hands_off_to_named_agent() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("We build web apps.")))
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();
    let id = open_session(&client, &srv).await;

    let sent = send(&client, &srv, &id, "hello").await;
    assert_eq!(sent["messages"].as_array().unwrap().len(), 1);
    assert_eq!(sent["messages"][0]["sender"], "user");

    let mut transcript = Value::Null;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        transcript = client
            .get(srv.url(&format!("/chat/sessions/{}/messages?since=0", id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if transcript["messages"].as_array().map_or(0, |m| m.len()) == 3 {
            break;
        }
    }
    let messages = transcript["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["sender"], "bot");
    assert_eq!(messages[2]["sender"], "bot");
    assert_eq!(messages[2]["agent_name"], "Sarah");
    assert!(messages[2]["text"].as_str().unwrap().contains("Sarah"));
    assert_eq!(transcript["agent_name"], "Sarah");
    assert_eq!(transcript["connected"], true);

    let sent = send(&client, &srv, &id, "What services do you offer?").await;
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["text"], "We build web apps.");
    assert_eq!(messages[1]["agent_name"], "Sarah");
    assert_eq!(sent["next"], 5);
}

#[tokio::test]
async fn test_job_request_redirects_to_application() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("unused")))
        .expect(0)
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();
    let id = open_session(&client, &srv).await;

    let sent = send(&client, &srv, &id, "I want to apply for the AI Engineer position").await;
    let reply = &sent["messages"][1];
    assert_eq!(
        reply["action"],
        json!({ "type": "redirect", "route": "/careers/ai-engineer/apply", "delay_ms": 1000 })
    );
}

#[tokio::test]
async fn test_upstream_failure_yields_single_apology() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&upstream)
        .await;
    let srv = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();
    let id = open_session(&client, &srv).await;

    let sent = send(&client, &srv, &id, "What is your pricing?").await;
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["text"], DEFAULT_APOLOGY);
    assert_eq!(sent["awaiting_reply"], false);
}

#[tokio::test]
async fn test_closed_session_is_gone() {
    let upstream = MockServer::start().await;
    let srv = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();
    let id = open_session(&client, &srv).await;

    let resp = client
        .delete(srv.url(&format!("/chat/sessions/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(srv.url(&format!("/chat/sessions/{}/messages", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}
