mod common;

use serde_json::{json, Value};

use common::{harness, Harness, CANNED_ANSWER};
use knowledgecast::server;

async fn spawn_server(h: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(h.manager.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_and_root() {
    let h = harness();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let root: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(root["status"], "healthy");
    assert_eq!(root["features"]["web_scraping"], true);
    assert_eq!(root["features"]["generation"], true);
    assert_eq!(root["features"]["audio_processing"], false);
}

#[tokio::test]
async fn upload_list_chat_and_delete() {
    let h = harness();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(
        b"Hello world, this is a test of the pipeline.".to_vec(),
    )
    .file_name("hello.txt")
    .mime_str("text/plain")
    .unwrap();
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("session_id", "http-session");

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["session_id"], "http-session");
    assert_eq!(body["source"]["name"], "hello.txt");
    assert_eq!(body["source"]["type"], "Document");

    let sources: Value = client
        .get(format!("{}/api/sources?session_id=http-session", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sources["sources"].as_array().unwrap().len(), 1);

    let chat: Value = client
        .post(format!("{}/api/chat", base))
        .json(&json!({"query": "What is this?", "session_id": "http-session"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chat["response"], CANNED_ANSWER);
    assert_eq!(chat["sources_used"][0]["source_file"], "hello.txt");

    let resp = client
        .delete(format!("{}/api/sources/hello.txt?session_id=http-session", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/api/sources/hello.txt?session_id=http-session", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn scrape_then_delete_source_with_slashes() {
    let h = harness();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/scrape?session_id=web", base))
        .json(&json!({"urls": ["https://example.com/a", "https://example.com/fail"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!(
            "{}/api/sources/https%3A%2F%2Fexample.com%2Fa?session_id=web",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(h.manager.get("web").unwrap().sources().is_empty());
}

#[tokio::test]
async fn error_contract() {
    let h = harness();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({"query": "hi", "session_id": "missing"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/api/text?session_id=s", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/api/sources", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/youtube?session_id=s", base))
        .json(&json!({"url": "https://youtu.be/dQw4w9WgXcQ"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "feature_disabled");

    let resp = client
        .get(format!("{}/api/podcast/audio/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn podcast_generate_over_http() {
    let h = harness();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/text?session_id=pod", base))
        .json(&json!({"content": "A long enough note about migrating birds."}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let name = body["source"]["name"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/api/podcast/generate?session_id=pod", base))
        .json(&json!({"source_name": name, "style": "interview"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let podcast: Value = resp.json().await.unwrap();
    assert_eq!(podcast["total_lines"], 2);
    assert_eq!(podcast["style"], "interview");
    assert!(podcast.get("audio_url").is_none());

    let resp = client
        .post(format!("{}/api/podcast/generate?session_id=pod", base))
        .json(&json!({"source_name": name, "style": "opera"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
