// ABOUTME: End-to-end smoke tests for the agentdeck HTTP surface.
// ABOUTME: Covers listing, chat, team pause/resume, flow polling with review, and session clearing.

use std::sync::Arc;
use std::time::Duration;

use agentdeck_agent::{EntityRegistry, HitlController, OfflineSearch};
use agentdeck_server::{AppState, ServerConfig, create_router};
use agentdeck_store::SqliteStore;
use axum::Router;
use axum::body::Body;
use http::Request;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Build a router over a fresh SQLite database in `dir`.
fn test_app(dir: &tempfile::TempDir) -> Router {
    let store = Arc::new(SqliteStore::open(&dir.path().join("agentdeck.db")).unwrap());
    let registry = Arc::new(EntityRegistry::builtin(Arc::new(OfflineSearch)));
    let controller = HitlController::new(registry, store.clone(), store);
    create_router(AppState::shared(controller, ServerConfig::default()))
}

/// Send a request and decode the JSON body.
async fn call(app: &Router, req: Request<Body>) -> (u16, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Poll a flow run until its status leaves pending/running.
async fn wait_for_settled(app: &Router, flow: &str, run_id: &str) -> Value {
    for _ in 0..100 {
        let (status, run) = call(
            app,
            get(&format!("/entities/flow/{flow}/run/{run_id}?include_steps=true")),
        )
        .await;
        assert_eq!(status, 200);
        if run["status"] != "pending" && run["status"] != "running" {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} did not settle");
}

#[tokio::test]
async fn smoke_lists_every_entity_kind() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, agents) = call(&app, get("/entities/agent")).await;
    assert_eq!(status, 200);
    assert_eq!(agents.as_array().unwrap().len(), 5);
    assert_eq!(agents[0]["name"], "Critic Agent");

    let (_, teams) = call(&app, get("/entities/team")).await;
    let market = teams
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["id"] == "market_research_team")
        .unwrap();
    assert_eq!(market["root_agent"], "research");

    let (_, flows) = call(&app, get("/entities/flow")).await;
    assert_eq!(flows.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn smoke_math_chat_completes() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = call(
        &app,
        post("/entities/agent/math/chat", json!({"message": "What is 2+3?"})),
    )
    .await;

    assert_eq!(status, 200, "chat failed: {body}");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["agent_name"], "math");
    assert!(body["response"].as_str().unwrap().contains('5'));
    assert!(body["session_id"].is_string());
}

#[tokio::test]
async fn smoke_team_pause_resume_and_stale_respond() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, paused) = call(
        &app,
        post(
            "/entities/team/market_research_team/chat",
            json!({"message": "Please update the NASDAQ index to 17000", "session_id": "desk-1"}),
        ),
    )
    .await;
    assert_eq!(status, 200, "chat failed: {paused}");
    assert_eq!(paused["status"], "pending_input");
    assert_eq!(paused["active_agent"], "market");
    assert_eq!(paused["session_id"], "desk-1");
    let workflow_id = paused["workflow_id"].as_str().unwrap().to_string();

    let respond = json!({"workflow_id": workflow_id, "response": "yes"});
    let (status, done) = call(
        &app,
        post("/entities/team/market_research_team/chat/respond", respond.clone()),
    )
    .await;
    assert_eq!(status, 200, "respond failed: {done}");
    assert_eq!(done["status"], "completed");
    assert_eq!(done["responding_agents"], json!(["research", "market"]));
    assert!(done["response"].as_str().unwrap().contains("SUCCESS"));

    let (status, stale) = call(
        &app,
        post("/entities/team/market_research_team/chat/respond", respond),
    )
    .await;
    assert_eq!(status, 400);
    assert!(stale["error"].is_string());

    let (status, cleared) = call(
        &app,
        Request::delete("/entities/team/market_research_team/session/desk-1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(cleared["status"], "cleared");
}

#[tokio::test]
async fn smoke_flow_runs_in_background_and_polls() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, started) = call(
        &app,
        post("/entities/flow/story_flow/run/async", json!({"topic": "tide pools"})),
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(started["status"], "pending");
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let run = wait_for_settled(&app, "story_flow", &run_id).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["flow_id"], "story_flow");
    assert!(run["result"].is_string());

    let names: Vec<&str> = run["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["step_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["research", "write"]);

    let steps_uri = format!("/entities/flow/story_flow/run/{run_id}/steps");
    let (status, steps) = call(&app, get(&steps_uri)).await;
    assert_eq!(status, 200);
    assert_eq!(steps.as_array().unwrap().len(), 2);

    let other_flow_uri = format!("/entities/flow/story_critic_flow/run/{run_id}");
    let (status, _) = call(&app, get(&other_flow_uri)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn smoke_review_flow_pauses_for_approval() {
    let dir = tempfile::TempDir::new().unwrap();
    let app = test_app(&dir);

    let (_, started) = call(
        &app,
        post("/entities/flow/story_review_flow/run/async", json!({"topic": "lighthouses"})),
    )
    .await;
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let run = wait_for_settled(&app, "story_review_flow", &run_id).await;
    assert_eq!(run["status"], "paused_for_input");
    assert_eq!(run["pending_prompt"], "Approve this article for publishing? (yes/no)");
    assert!(run["result"].is_null());

    let (status, done) = call(
        &app,
        post(
            "/entities/flow/story_review_flow/run/respond",
            json!({"workflow_id": run_id, "response": "yes"}),
        ),
    )
    .await;
    assert_eq!(status, 200, "respond failed: {done}");
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"]["published"], true);

    let (_, run) = call(
        &app,
        get(&format!("/entities/flow/story_review_flow/run/{run_id}?include_steps=true")),
    )
    .await;
    let events: Vec<&str> = run["steps"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["event_type"].as_str())
        .collect();
    assert!(events.contains(&"hitl_request"));
    assert!(events.contains(&"hitl_response"));
}
