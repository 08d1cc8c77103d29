use habitual::config::TelegramConfig;
use habitual::gateway::telegram::TelegramGateway;
use habitual::gateway::{Command, InboundEvent, MessagingGateway};
use habitual::registry::SubjectId;
use habitual::schedule::default_entries;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:test-token";

fn gateway(server: &MockServer) -> TelegramGateway {
    TelegramGateway::new(&TelegramConfig {
        bot_token: TOKEN.to_owned(),
        api_base_url: server.uri(),
        poll_timeout_secs: 0,
        ..TelegramConfig::default()
    })
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
}

#[tokio::test]
async fn prompt_is_sent_with_an_inline_keyboard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_partial_json(json!({
            "chat_id": 42,
            "reply_markup": {
                "inline_keyboard": [[
                    { "text": "Yes", "callback_data": "yes:Mind" },
                    { "text": "No", "callback_data": "no:Mind" }
                ]]
            }
        })))
        .respond_with(ok(json!({ "message_id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let mind = default_entries()
        .into_iter()
        .find(|e| e.area == "Mind")
        .unwrap();
    gateway(&server)
        .send_prompt(&SubjectId::from("42"), &mind.prompt())
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_call_surfaces_the_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "description": "Forbidden: bot was blocked by the user"
        })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .send_text(&SubjectId::from("42"), "hello")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blocked by the user"));
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .send_text(&SubjectId::from("42"), "hello")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn report_is_uploaded_as_a_document() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendDocument")))
        .respond_with(ok(json!({ "message_id": 2 })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report_42_2026-10.json");
    std::fs::write(&file, br#"{"subject":"42"}"#).unwrap();
    gateway(&server)
        .send_document(&SubjectId::from("42"), &file, "Monthly report 2026-10")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"caption\""));
    assert!(body.contains("Monthly report 2026-10"));
    assert!(body.contains("filename=\"report_42_2026-10.json\""));
}

#[tokio::test]
async fn polling_forwards_answers_and_commands() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/getUpdates")))
        .respond_with(ok(json!([
            {
                "update_id": 500,
                "callback_query": { "id": "cb-9", "from": { "id": 42 }, "data": "yes:Body" }
            },
            {
                "update_id": 501,
                "message": { "from": { "id": 42 }, "chat": { "id": 42 }, "text": "/report" }
            }
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/getUpdates")))
        .and(body_partial_json(json!({ "offset": 502 })))
        .respond_with(ok(json!([])).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/answerCallbackQuery")))
        .and(body_partial_json(json!({ "callback_query_id": "cb-9" })))
        .respond_with(ok(json!(true)))
        .expect(1)
        .mount(&server)
        .await;

    let telegram = gateway(&server);
    let (tx, mut rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let poller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { telegram.run_polling(tx, shutdown).await })
    };

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        InboundEvent::Answer {
            subject: SubjectId::from("42"),
            area: "Body".into(),
            value: 1,
        }
    );
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        second,
        InboundEvent::Command {
            subject: SubjectId::from("42"),
            command: Command::Report,
        }
    );

    shutdown.cancel();
    poller.await.unwrap().unwrap();
}
