//! Full listing pipeline against an in-memory stub of the five services.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use qa_core::config::HttpConfig;
use qa_core::{PhaseStatus, ServiceClient};
use qa_e2e::catalog::{ASSET, POI, RENDER, SCRIPT, TRANSCRIPTION};
use qa_e2e::{listing_pipeline, ExecutorSettings, WorkflowExecutor};
use serde_json::{json, Value};
use uuid::Uuid;

const API_KEY: &str = "dev-api-key";
const NOW: &str = "2026-01-01T00:00:00Z";

#[derive(Default)]
struct Store {
    pois: HashMap<String, Value>,
    assets: Vec<Value>,
    scripts: Vec<Value>,
    transcriptions: HashMap<String, (Value, u32)>,
    renders: Vec<Value>,
    correlation_ids: HashSet<String>,
}

type Shared = Arc<Mutex<Store>>;
type Params = Query<HashMap<String, String>>;

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn not_found(what: &str) -> Response {
    reply(
        StatusCode::NOT_FOUND,
        json!({"error": "not_found", "detail": format!("{what} not found")}),
    )
}

fn invalid(detail: &str) -> Response {
    reply(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({"error": "validation_error", "detail": detail}),
    )
}

fn page(items: Vec<Value>) -> Response {
    let total = items.len();
    reply(
        StatusCode::OK,
        json!({"items": items, "total": total, "page": 1, "page_size": 20}),
    )
}

async fn auth(State(store): State<Shared>, request: Request, next: Next) -> Response {
    if let Some(id) = request.headers().get("x-correlation-id").and_then(|v| v.to_str().ok()) {
        store.lock().correlation_ids.insert(id.to_string());
    }
    let public = matches!(request.uri().path(), "/healthz" | "/readyz");
    let key = request.headers().get("x-api-key").and_then(|v| v.to_str().ok());
    if public || key == Some(API_KEY) {
        next.run(request).await
    } else {
        reply(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"}))
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok", "service": "stub"}))
}

async fn readyz() -> Json<Value> {
    Json(json!({"status": "ready"}))
}

fn in_range(body: &Value, key: &str, limit: f64) -> bool {
    body[key].as_f64().map(|v| v.abs() <= limit).unwrap_or(false)
}

async fn create_poi(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let name_ok = body["name"].as_str().map(|n| !n.is_empty()).unwrap_or(false);
    if !name_ok || !in_range(&body, "lat", 90.0) || !in_range(&body, "lon", 180.0) {
        return invalid("name, lat and lon are required and must be valid");
    }
    let id = Uuid::new_v4().to_string();
    let poi = json!({
        "id": id,
        "name": body["name"],
        "description": body.get("description").cloned().unwrap_or(Value::Null),
        "address": body.get("address").cloned().unwrap_or(Value::Null),
        "lat": body["lat"],
        "lon": body["lon"],
        "poi_type": body.get("poi_type").cloned().unwrap_or(json!("other")),
        "tags": body.get("tags").cloned().unwrap_or(json!([])),
        "metadata": body.get("metadata").cloned().unwrap_or(json!({})),
        "status": "draft",
        "version": 1,
        "created_at": NOW,
        "updated_at": NOW,
    });
    store.lock().pois.insert(id, poi.clone());
    reply(StatusCode::CREATED, poi)
}

async fn list_pois(State(store): State<Shared>) -> Response {
    page(store.lock().pois.values().cloned().collect())
}

async fn get_poi(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match store.lock().pois.get(&id) {
        Some(poi) => reply(StatusCode::OK, poi.clone()),
        None => not_found("poi"),
    }
}

async fn update_poi(State(store): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock();
    let Some(poi) = store.pois.get_mut(&id) else {
        return not_found("poi");
    };
    for key in ["description", "tags", "metadata"] {
        if let Some(value) = body.get(key) {
            poi[key] = value.clone();
        }
    }
    if poi["status"] != "draft" {
        let version = poi["version"].as_u64().unwrap_or(1);
        poi["version"] = json!(version + 1);
    }
    reply(StatusCode::OK, poi.clone())
}

async fn transition_poi(State(store): State<Shared>, Path((id, action)): Path<(String, String)>) -> Response {
    let mut store = store.lock();
    let Some(poi) = store.pois.get_mut(&id) else {
        return not_found("poi");
    };
    let next = match (action.as_str(), poi["status"].as_str()) {
        ("validate", Some("draft")) => "validated",
        ("publish", Some("validated")) => "published",
        ("archive", Some("published")) => "archived",
        _ => return reply(StatusCode::CONFLICT, json!({"error": "conflict", "detail": "transition not allowed"})),
    };
    poi["status"] = json!(next);
    reply(StatusCode::OK, poi.clone())
}

async fn create_asset(State(store): State<Shared>, Json(mut body): Json<Value>) -> Response {
    if ["poi_id", "name", "asset_type"].iter().any(|k| body.get(*k).is_none()) {
        return invalid("poi_id, name and asset_type are required");
    }
    body["id"] = json!(Uuid::new_v4().to_string());
    body["version"] = json!(1);
    body["created_at"] = json!(NOW);
    body["updated_at"] = json!(NOW);
    store.lock().assets.push(body.clone());
    reply(StatusCode::CREATED, body)
}

fn by_poi(items: &[Value], params: &HashMap<String, String>) -> Vec<Value> {
    items
        .iter()
        .filter(|item| params.get("poi_id").map_or(true, |p| item["poi_id"] == p.as_str()))
        .cloned()
        .collect()
}

fn find(items: &[Value], id: &str) -> Option<Value> {
    items.iter().find(|item| item["id"] == id).cloned()
}

async fn list_assets(State(store): State<Shared>, Query(params): Params) -> Response {
    page(by_poi(&store.lock().assets, &params))
}

async fn get_asset(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match find(&store.lock().assets, &id) {
        Some(asset) => reply(StatusCode::OK, asset),
        None => not_found("asset"),
    }
}

async fn update_asset(State(store): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock();
    let Some(asset) = store.assets.iter_mut().find(|a| a["id"] == id.as_str()) else {
        return not_found("asset");
    };
    if let Some(description) = body.get("description") {
        asset["description"] = description.clone();
    }
    let version = asset["version"].as_u64().unwrap_or(1);
    asset["version"] = json!(version + 1);
    reply(StatusCode::OK, asset.clone())
}

async fn generate_script(State(store): State<Shared>, Query(params): Params) -> Response {
    let Some(poi_id) = params.get("poi_id").cloned() else {
        return invalid("poi_id is required");
    };
    let script = json!({
        "id": Uuid::new_v4().to_string(),
        "poi_id": poi_id,
        "title": "Villa tour",
        "scenes": [
            {"scene_number": 1, "title": "Arrival", "duration_seconds": 8},
            {"scene_number": 2, "title": "Garden", "duration_seconds": 12}
        ],
        "total_duration_seconds": 20,
        "narration_text": "Welcome to this exceptional villa in central Paris.",
        "tone": "warm",
        "nlp_provider": "stub",
    });
    let render = json!({
        "id": Uuid::new_v4().to_string(),
        "poi_id": poi_id,
        "status": "completed",
        "completed_scenes": 2,
        "output_path": "/renders/out.mp4",
    });
    let mut store = store.lock();
    store.scripts.push(script.clone());
    store.renders.push(render);
    reply(StatusCode::CREATED, script)
}

async fn list_scripts(State(store): State<Shared>, Query(params): Params) -> Response {
    page(by_poi(&store.lock().scripts, &params))
}

async fn get_script(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match find(&store.lock().scripts, &id) {
        Some(script) => reply(StatusCode::OK, script),
        None => not_found("script"),
    }
}

async fn start_transcription(State(store): State<Shared>, Query(params): Params) -> Response {
    let (Some(poi_id), Some(video)) = (params.get("poi_id"), params.get("asset_video_id")) else {
        return invalid("poi_id and asset_video_id are required");
    };
    let id = Uuid::new_v4().to_string();
    let job = json!({"id": id, "status": "processing", "poi_id": poi_id, "asset_video_id": video});
    store.lock().transcriptions.insert(id, (job.clone(), 0));
    reply(StatusCode::CREATED, job)
}

async fn get_transcription(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = store.lock();
    let Some((job, polls)) = store.transcriptions.get_mut(&id) else {
        return not_found("transcription");
    };
    *polls += 1;
    if *polls >= 2 {
        job["status"] = json!("completed");
        job["text"] = json!("Bienvenue dans cette villa d'exception.");
        job["confidence"] = json!(0.93);
        job["segments"] = json!([{"start": 0.0, "end": 2.5, "text": "Bienvenue"}]);
    }
    reply(StatusCode::OK, job.clone())
}

async fn list_renders(State(store): State<Shared>, Query(params): Params) -> Response {
    page(by_poi(&store.lock().renders, &params))
}

async fn get_render(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match find(&store.lock().renders, &id) {
        Some(render) => reply(StatusCode::OK, render),
        None => not_found("render"),
    }
}

async fn publish_render(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match find(&store.lock().renders, &id) {
        Some(_) => reply(
            StatusCode::OK,
            json!({
                "id": id,
                "published_url": format!("https://cdn.example.com/videos/{id}.mp4"),
                "published_at": NOW,
            }),
        ),
        None => not_found("render"),
    }
}

async fn spawn_stub() -> (String, Shared) {
    let store: Shared = Arc::default();
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/pois", get(list_pois).post(create_poi))
        .route("/pois/:id", get(get_poi).patch(update_poi))
        .route("/pois/:id/:action", post(transition_poi))
        .route("/assets", get(list_assets).post(create_asset))
        .route("/assets/:id", get(get_asset).patch(update_asset))
        .route("/scripts", get(list_scripts))
        .route("/scripts/generate", post(generate_script))
        .route("/scripts/:id", get(get_script))
        .route("/transcriptions/start", post(start_transcription))
        .route("/transcriptions/:id", get(get_transcription))
        .route("/renders", get(list_renders))
        .route("/renders/:id", get(get_render))
        .route("/renders/:id/publish", post(publish_render))
        .layer(middleware::from_fn_with_state(Arc::clone(&store), auth))
        .with_state(Arc::clone(&store));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), store)
}

#[tokio::test]
async fn test_listing_pipeline_passes_against_conforming_services() {
    let (base, store) = spawn_stub().await;
    let services = [POI, ASSET, SCRIPT, TRANSCRIPTION, RENDER];
    let base_urls: BTreeMap<String, String> = services.iter().map(|s| (s.to_string(), base.clone())).collect();

    let executor = WorkflowExecutor::new(
        Arc::new(ServiceClient::new(&HttpConfig::default()).unwrap()),
        base_urls,
        ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            poll_max_attempts: 20,
        },
    );
    let report = executor.run(&listing_pipeline(&services)).await.unwrap();

    let failures: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.status != PhaseStatus::Pass)
        .map(|s| (&s.name, &s.message))
        .collect();
    assert!(failures.is_empty(), "failed steps: {failures:#?}");
    assert_eq!(report.steps.len(), 14);
    assert_eq!(report.step("transcription").unwrap().attempts, Some(2));

    let guard = store.lock();
    let ids = &guard.correlation_ids;
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(&report.correlation_id.to_string()));
}

#[tokio::test]
async fn test_listing_pipeline_flags_broken_auth() {
    let (base, _store) = spawn_stub().await;
    let mut http = HttpConfig::default();
    http.api_key = "not-the-key".to_string();
    let base_urls = BTreeMap::from([(POI.to_string(), base.clone()), (ASSET.to_string(), base)]);

    let executor = WorkflowExecutor::new(
        Arc::new(ServiceClient::new(&http).unwrap()),
        base_urls,
        ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            poll_max_attempts: 2,
        },
    );
    let report = executor.run(&listing_pipeline(&[POI])).await.unwrap();

    assert!(!report.passed());
    assert_eq!(report.step("health_readiness").unwrap().status, PhaseStatus::Pass);
    assert_eq!(report.step("create_poi").unwrap().status, PhaseStatus::Fail);
    assert_eq!(report.step("update_poi").unwrap().status, PhaseStatus::Skip);
}
