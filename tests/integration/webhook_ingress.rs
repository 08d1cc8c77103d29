use habitual::config::HabitConfig;
use habitual::gateway::memory::{MemoryGateway, SentMessage};
use habitual::registry::SubjectId;
use habitual::runtime::HabitRuntime;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const BEARER: &str = "ingress-secret";

async fn start(dir: &std::path::Path) -> (HabitRuntime, Arc<MemoryGateway>, String) {
    let mut config = HabitConfig::default();
    config.store.data_dir = Some(dir.to_path_buf());
    config.gateway.webhook.enabled = true;
    config.gateway.webhook.port = 0;
    config.gateway.webhook.bearer_token = Some(BEARER.to_owned());
    let gateway = Arc::new(MemoryGateway::new());
    let runtime = HabitRuntime::start_with_gateway(config, gateway.clone())
        .await
        .unwrap();
    let base = format!("http://{}", runtime.webhook_addr().unwrap());
    (runtime, gateway, base)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn answer_api_requires_the_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _gateway, base) = start(dir.path()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let body = json!({ "subject": "42", "area": "Body", "value": 1 });
    let anonymous = client
        .post(format!("{base}/answer"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);

    let wrong = client
        .post(format!("{base}/answer"))
        .bearer_auth("nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let blank = client
        .post(format!("{base}/answer"))
        .bearer_auth(BEARER)
        .json(&json!({ "subject": " ", "area": "Body", "value": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), 400);

    // Telegram is not configured for this runtime.
    let telegram = client
        .post(format!("{base}/telegram"))
        .json(&json!({ "update_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(telegram.status(), 404);

    runtime.shutdown().await;
}

#[tokio::test]
async fn answer_posted_over_http_is_recorded_and_confirmed() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, gateway, base) = start(dir.path()).await;
    let s = SubjectId::from("42");

    let response = reqwest::Client::new()
        .post(format!("{base}/answer"))
        .bearer_auth(BEARER)
        .json(&json!({ "subject": "42", "area": "Body", "value": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["queued"], true);

    let today = chrono::Local::now().date_naive();
    let store = Arc::clone(&runtime.context().store);
    eventually(|| {
        let store = Arc::clone(&store);
        let s = s.clone();
        async move { store.read(&s, today, "Body").await.ok().flatten() == Some(1) }
    })
    .await;
    eventually(|| {
        let gateway = Arc::clone(&gateway);
        let s = s.clone();
        async move {
            gateway.sent_to(&s).iter().any(|m| {
                matches!(m, SentMessage::Text { text, .. } if text == "Answer recorded for Body: YES")
            })
        }
    })
    .await;

    runtime.shutdown().await;
    let container = dir.path().join("records").join("42.json");
    assert!(container.is_file());
}

#[tokio::test]
async fn start_command_subscribes_durably() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _gateway, base) = start(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/command"))
        .bearer_auth(BEARER)
        .json(&json!({ "subject": "42", "command": "start" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let registry = Arc::clone(&runtime.context().registry);
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.list_all().await.unwrap() == [SubjectId::from("42")] }
    })
    .await;
    runtime.shutdown().await;

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("subjects.json")).unwrap()).unwrap();
    assert_eq!(doc["subjects"], json!(["42"]));
}
