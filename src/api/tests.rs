use super::*;
use crate::store::Database;

const TEST_API_KEY: &str = "test-secret-key-1234567890123456789012345678901234567890";

fn test_config(api_key: Option<&str>) -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        api_key: api_key.map(str::to_string),
        database_path: ":memory:".to_string(),
        allowed_origins: vec!["http://localhost:3000".to_string()],
        slack_signing_secret: Some("slack-signing-secret".to_string()),
        github_webhook_secret: None,
        agentmail_webhook_secret: None,
    }
}

/// Serve a broker on a random port; returns its base URL.
async fn spawn_server(config: BrokerConfig) -> String {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let server = ApiServer::new(config, db);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.build_router();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn register_agent(base: &str, name: &str, is_lead: bool, max_tasks: i64) -> String {
    let response = client()
        .post(format!("{base}/agents"))
        .bearer_auth(TEST_API_KEY)
        .json(&serde_json::json!({
            "name": name,
            "isLead": is_lead,
            "maxTasks": max_tasks
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json::<serde_json::Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_is_open_but_api_requires_bearer() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let response = client().get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    // No bearer: 401.
    let response = client()
        .get(format!("{base}/api/tasks"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Wrong bearer: 401.
    let response = client()
        .get(format!("{base}/api/tasks"))
        .bearer_auth("wrong-key-123456789012345678901234567890")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Right bearer: 200.
    let response = client()
        .get(format!("{base}/api/tasks"))
        .bearer_auth(TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn agent_calls_require_agent_header() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let response = client()
        .post(format!("{base}/ping"))
        .bearer_auth(TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("X-Agent-ID"));
}

#[tokio::test]
async fn me_reports_capacity_and_inbox() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;
    let agent_id = register_agent(&base, "scribe", false, 3).await;

    let response = client()
        .get(format!("{base}/me?include=inbox"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &agent_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], agent_id.as_str());
    assert_eq!(body["capacity"]["max"], 3);
    assert_eq!(body["capacity"]["current"], 0);
    assert_eq!(body["capacity"]["available"], 3);
    assert_eq!(body["inbox"]["unreadCount"], 0);
}

#[tokio::test]
async fn unknown_agent_is_404() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let response = client()
        .get(format!("{base}/me"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", "ghost")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;
    let worker = register_agent(&base, "worker", false, 1).await;

    // Create an assigned task.
    let response = client()
        .post(format!("{base}/api/tasks"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &worker)
        .json(&serde_json::json!({
            "description": "ship it",
            "agentId": worker
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let task: serde_json::Value = response.json().await.unwrap();
    let task_id = task["id"].as_str().unwrap().to_string();
    assert_eq!(task["status"], "pending");

    // Poll dispatches it.
    let response = client()
        .get(format!("{base}/api/poll"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &worker)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["trigger"]["type"], "task_assigned");
    assert_eq!(body["trigger"]["taskId"], task_id.as_str());

    // Finish, then finish again with a contradictory outcome.
    let response = client()
        .post(format!("{base}/api/tasks/{task_id}/finish"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &worker)
        .json(&serde_json::json!({ "status": "completed", "output": "ok" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["alreadyFinished"], false);

    let response = client()
        .post(format!("{base}/api/tasks/{task_id}/finish"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &worker)
        .json(&serde_json::json!({ "status": "failed", "failureReason": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["alreadyFinished"], true);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output"], "ok");
}

#[tokio::test]
async fn finish_rejects_unknown_status() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;
    let worker = register_agent(&base, "worker", false, 1).await;

    let response = client()
        .post(format!("{base}/api/tasks/whatever/finish"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &worker)
        .json(&serde_json::json!({ "status": "done" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn cancelled_tasks_hook_reports_reason() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;
    let lead = register_agent(&base, "lead", true, 1).await;
    let worker = register_agent(&base, "worker", false, 1).await;

    let response = client()
        .post(format!("{base}/api/tasks"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &lead)
        .json(&serde_json::json!({ "description": "doomed", "agentId": worker }))
        .send()
        .await
        .unwrap();
    let task_id = response.json::<serde_json::Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = client()
        .post(format!("{base}/api/tasks/{task_id}/cancel"))
        .bearer_auth(TEST_API_KEY)
        .header("X-Agent-ID", &lead)
        .json(&serde_json::json!({ "reason": "scope changed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client()
        .get(format!("{base}/cancelled-tasks?taskId={task_id}"))
        .bearer_auth(TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["cancelled"][0]["id"], task_id.as_str());
    assert_eq!(body["cancelled"][0]["failureReason"], "scope changed");
}

#[tokio::test]
async fn name_collision_is_409() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;
    register_agent(&base, "Atlas", false, 1).await;

    let response = client()
        .post(format!("{base}/agents"))
        .bearer_auth(TEST_API_KEY)
        .json(&serde_json::json!({ "name": "atlas" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn session_logs_and_costs_are_accepted() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let response = client()
        .post(format!("{base}/api/session-logs"))
        .bearer_auth(TEST_API_KEY)
        .json(&serde_json::json!({
            "sessionId": "s1",
            "iteration": 1,
            "cli": "claude",
            "lines": ["{\"type\":\"message\"}"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client()
        .post(format!("{base}/api/session-costs"))
        .bearer_auth(TEST_API_KEY)
        .json(&serde_json::json!({
            "sessionId": "s1",
            "iteration": 1,
            "costUsd": 0.05,
            "inputTokens": 100,
            "outputTokens": 50
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Empty lines are a validation error.
    let response = client()
        .post(format!("{base}/api/session-logs"))
        .bearer_auth(TEST_API_KEY)
        .json(&serde_json::json!({
            "sessionId": "s1",
            "iteration": 1,
            "cli": "claude",
            "lines": []
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn slack_webhook_verifies_signature() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let body = serde_json::json!({
        "type": "url_verification",
        "challenge": "check-123"
    })
    .to_string();
    let timestamp = "1700000000";
    let expected = format!(
        "v0={}",
        super::webhooks::hmac_hex(
            "slack-signing-secret",
            format!("v0:{timestamp}:{body}").as_bytes()
        )
    );

    // Valid signature: the challenge comes back.
    let response = client()
        .post(format!("{base}/webhooks/slack"))
        .header("x-slack-request-timestamp", timestamp)
        .header("x-slack-signature", &expected)
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reply: serde_json::Value = response.json().await.unwrap();
    assert_eq!(reply["challenge"], "check-123");

    // Tampered signature: rejected.
    let response = client()
        .post(format!("{base}/webhooks/slack"))
        .header("x-slack-request-timestamp", timestamp)
        .header("x-slack-signature", "v0=deadbeef")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn disabled_integration_is_503() {
    let base = spawn_server(test_config(Some(TEST_API_KEY))).await;

    let response = client()
        .post(format!("{base}/webhooks/github"))
        .header("x-hub-signature-256", "sha256=00")
        .header("x-github-event", "issues")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn open_broker_without_key_accepts_requests() {
    let base = spawn_server(test_config(None)).await;

    let response = client()
        .get(format!("{base}/api/tasks"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}
