//! HTTP API tests: a real server on an ephemeral port, driven with reqwest.

mod common;

use std::sync::Arc;

use common::{minimal_docx, HashEmbedder, ScriptedModel, NOTICE};
use docchat::config::Config;
use docchat::retriever::REFUSAL;
use docchat::server::{serve, AppContext};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tempfile::TempDir;

struct TestServer {
    base: String,
    llm: Arc<ScriptedModel>,
    _tmp: TempDir,
}

async fn start(reply: &str) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.index.path = tmp.path().join("vectorstore").join("index.sqlite");

    let llm = Arc::new(ScriptedModel::new(reply));
    let ctx = AppContext::new(config, Arc::new(HashEmbedder::new()), llm.clone()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(serve(Arc::new(ctx), listener));

    TestServer {
        base,
        llm,
        _tmp: tmp,
    }
}

fn file_form(name: &str, bytes: &[u8]) -> Form {
    Form::new().part("file", Part::bytes(bytes.to_vec()).file_name(name.to_string()))
}

async fn upload(server: &TestServer, name: &str, bytes: &[u8]) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/upload-and-build/", server.base))
        .multipart(file_form(name, bytes))
        .send()
        .await
        .unwrap()
}

async fn chat(server: &TestServer, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/chat/", server.base))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let server = start("unused").await;
    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn upload_then_chat_records_history() {
    let server = start("The tenant must vacate by March 1, 2025.").await;

    let resp = upload(&server, "notice.txt", NOTICE.as_bytes()).await;
    assert_eq!(resp.status(), 200);
    let uploaded: Value = resp.json().await.unwrap();
    assert_eq!(
        uploaded["message"],
        "Successfully processed 1 chunks and built the vector DB."
    );
    let id = uploaded["conversation_id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let resp = chat(
        &server,
        json!({ "conversation_id": id, "query": "When must the tenant vacate?" }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "The tenant must vacate by March 1, 2025.");
    assert_eq!(body["outcome"], "generated");
    assert_eq!(
        body["chat_history"],
        json!([
            { "role": "user", "text": "When must the tenant vacate?" },
            { "role": "bot", "text": "The tenant must vacate by March 1, 2025." }
        ])
    );

    let body: Value = chat(&server, json!({ "conversation_id": id, "query": "And the deposit?" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["chat_history"].as_array().unwrap().len(), 4);
    assert_eq!(server.llm.call_count(), 2);
}

#[tokio::test]
async fn docx_upload_is_parsed_and_answerable() {
    let server = start("The hearing is on 12 May 2025.").await;
    let bytes = minimal_docx(&[
        "Summons to appear before the district court.",
        "Date of hearing: 12 May 2025, at the courthouse on Main Street.",
    ]);

    let resp = upload(&server, "summons.docx", &bytes).await;
    assert_eq!(resp.status(), 200);
    let uploaded: Value = resp.json().await.unwrap();
    assert_eq!(uploaded["chunk_count"], 1);

    let body: Value = chat(
        &server,
        json!({ "conversation_id": uploaded["conversation_id"], "query": "When is the hearing?" }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["outcome"], "generated");
    let prompt = &server.llm.prompts.lock().unwrap()[0];
    assert!(prompt.contains("Date of hearing: 12 May 2025"));
}

#[tokio::test]
async fn model_refusal_is_normalized_over_http() {
    let server = start("I'm sorry, that is not in the knowledge base.").await;
    let uploaded: Value = upload(&server, "notice.txt", NOTICE.as_bytes())
        .await
        .json()
        .await
        .unwrap();

    let body: Value = chat(
        &server,
        json!({ "conversation_id": uploaded["conversation_id"], "query": "Who won the 1998 World Cup?" }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["answer"], REFUSAL);
    assert_eq!(body["outcome"], "normalized_refusal");
}

#[tokio::test]
async fn chat_errors_use_the_error_contract() {
    let server = start("unused").await;

    let resp = chat(&server, json!({ "conversation_id": "nope", "query": "hi" })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown_conversation");

    let resp = chat(&server, json!({ "query": "hi" })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = reqwest::Client::new()
        .post(format!("{}/chat/", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn rejected_uploads_leave_no_index() {
    let server = start("unused").await;

    let resp = upload(&server, "budget.xlsx", b"PK\x03\x04").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    let resp = upload(&server, "blank.txt", b"  \n ").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "empty_document");

    let resp = reqwest::Client::new()
        .post(format!("{}/upload-and-build/", server.base))
        .multipart(Form::new().text("language", "English"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(!server._tmp.path().join("vectorstore").join("index.sqlite").exists());
}

#[tokio::test]
async fn summarize_returns_structured_summary() {
    let reply = r#"```json
{
  "category": "Notice",
  "description": "A notice to vacate a rented property.",
  "important_timeline": ["March 1, 2025: vacate the premises"],
  "main_takeaway": ["The tenant must leave by March 1, 2025."],
  "risk_factors": ["Housing court proceedings"],
  "next_steps": ["Arrange a move-out inspection"],
  "urgency_percentage": 80,
  "urgency_level": "High"
}
```"#;
    let server = start(reply).await;

    let form = file_form("notice.txt", NOTICE.as_bytes()).text("language", "English");
    let resp = reqwest::Client::new()
        .post(format!("{}/summarize/", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["is_summarized"], false);
    assert_eq!(body["summary"]["category"], "Notice");
    assert_eq!(body["summary"]["urgency_percentage"], 80);

    let prompt = &server.llm.prompts.lock().unwrap()[0];
    assert!(prompt.contains("English"));
    assert!(prompt.contains("no later than March 1, 2025"));
}

#[tokio::test]
async fn summarize_requires_language() {
    let server = start("unused").await;
    let resp = reqwest::Client::new()
        .post(format!("{}/summarize/", server.base))
        .multipart(file_form("notice.txt", NOTICE.as_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(server.llm.call_count(), 0);
}
