//! End-to-end gateway scenarios
//!
//! Each test assembles a full gateway against mock workers (real HTTP
//! listeners), a scripted chat backend, and local buckets rooted in a
//! temporary directory, then drives the router directly.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use clash_common::chat::{ChatBackend, ChatError, ChatRequest};
use clash_common::salt::UserSalt;
use clash_common::{Battle, DetailedPrompt, SystemAccess, SystemKey, SystemMetadata};
use clash_gateway::api::build_router;
use clash_gateway::bucket::{Bucket, LocalBucket};
use clash_gateway::cache::BattleCache;
use clash_gateway::generator::BattleGenerator;
use clash_gateway::probe::{AudioInfo, AudioProbe, ProbeError};
use clash_gateway::state::AppState;
use clash_gateway::worker::WorkerClient;

const FAKE_MP3: &[u8] = b"ID3\x03fake-mp3-bytes-for-testing";

// === Mock worker ===

struct WorkerBehavior {
    /// Number of initial /generate calls to fail with 500.
    fail_generates: AtomicU32,
    git_hash: &'static str,
}

async fn worker_generate(
    State(behavior): State<Arc<WorkerBehavior>>,
    Json(_prompt): Json<Value>,
) -> Response {
    if behavior
        .fail_generates
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, "synthetic worker failure").into_response();
    }
    Json(json!({
        "audio_b64": base64::engine::general_purpose::STANDARD.encode(FAKE_MP3),
        "git_hash": behavior.git_hash,
        "time_queued": 1.0,
        "time_started": 2.0,
        "time_completed": 3.0,
    }))
    .into_response()
}

async fn spawn_worker(fail_generates: u32, git_hash: &'static str) -> u16 {
    let behavior = Arc::new(WorkerBehavior {
        fail_generates: AtomicU32::new(fail_generates),
        git_hash,
    });
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/generate", post(worker_generate))
        .with_state(behavior);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

// === Scripted chat backend ===

#[derive(Debug)]
struct ScriptedChat {
    responses: std::sync::Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: std::sync::Mutex::new(
                responses.iter().rev().map(|s| s.to_string()).collect(),
            ),
        })
    }

    fn empty() -> Arc<Self> {
        Self::new(&[])
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<String, ChatError> {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ChatError::Backend("script exhausted".to_string()))
    }
}

// === Stub probe ===

struct StubProbe;

#[async_trait]
impl AudioProbe for StubProbe {
    async fn probe(&self, _audio: &[u8]) -> Result<AudioInfo, ProbeError> {
        Ok(AudioInfo {
            sample_rate: Some(44100),
            num_channels: Some(2),
            duration: Some(5.0),
        })
    }
}

// === Harness ===

struct Harness {
    router: Router,
    data_dir: tempfile::TempDir,
    sys_a: SystemKey,
    sys_b: SystemKey,
}

fn system_meta(key: &SystemKey, port: u16) -> SystemMetadata {
    SystemMetadata {
        key: key.clone(),
        display_name: key.system_tag.clone(),
        description: String::new(),
        organization: "Test".into(),
        access: SystemAccess::Open,
        supports_lyrics: false,
        private: false,
        model_type: None,
        citation: None,
        links: Default::default(),
        release_audio_publicly: true,
        port: Some(port),
    }
}

async fn harness_with(
    chat: Arc<dyn ChatBackend>,
    fail_a: u32,
    fail_b: u32,
    prebaked: Vec<DetailedPrompt>,
) -> Harness {
    let port_a = spawn_worker(fail_a, "aaaa1111").await;
    let port_b = spawn_worker(fail_b, "bbbb2222").await;

    let sys_a = SystemKey::new("sysa", "v1").unwrap();
    let sys_b = SystemKey::new("sysb", "v1").unwrap();

    let mut catalog = BTreeMap::new();
    catalog.insert(sys_a.clone(), system_meta(&sys_a, port_a));
    catalog.insert(sys_b.clone(), system_meta(&sys_b, port_b));
    let catalog = Arc::new(catalog);

    let mut ports = HashMap::new();
    ports.insert(sys_a.clone(), port_a);
    ports.insert(sys_b.clone(), port_b);

    let worker = WorkerClient::new("http://127.0.0.1", ports, 1, Arc::new(StubProbe)).unwrap();
    let generator =
        Arc::new(BattleGenerator::new(Arc::clone(&catalog), None, worker, chat).unwrap());

    let data_dir = tempfile::tempdir().unwrap();
    let bucket_audio = Bucket::Local(
        LocalBucket::new(
            data_dir.path().join("audio"),
            Some("http://files.test/audio".into()),
        )
        .unwrap(),
    );
    let bucket_metadata = Bucket::Local(
        LocalBucket::new(
            data_dir.path().join("metadata"),
            Some("http://files.test/metadata".into()),
        )
        .unwrap(),
    );

    let prebaked_map: HashMap<String, DetailedPrompt> = prebaked
        .into_iter()
        .map(|p| (p.checksum(), p))
        .collect();

    let state = AppState {
        generator,
        bucket_audio: Arc::new(bucket_audio),
        bucket_metadata: Arc::new(bucket_metadata),
        battles: Arc::new(Mutex::new(BattleCache::new(0))),
        prebaked: Arc::new(prebaked_map),
        salt: Arc::new(UserSalt::new("test-salt")),
        flakiness: 0.0,
    };

    Harness {
        router: build_router(state),
        data_dir,
        sys_a,
        sys_b,
    }
}

impl Harness {
    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn stored_battle(&self, uuid: &str) -> Battle {
        let path = self
            .data_dir
            .path()
            .join("metadata")
            .join(format!("{}.json", uuid));
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn stored_files(&self, bucket: &str) -> Vec<String> {
        let dir = self.data_dir.path().join(bucket);
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn session_json() -> Value {
    json!({
        "uuid": Uuid::new_v4(),
        "create_time": 1700000000.0,
        "frontend_version": "test-frontend",
        "ack_tos": "tos-v1"
    })
}

fn generate_body(session: &Value) -> Value {
    json!({
        "session": session,
        "user": {"ip": "10.0.0.1", "fingerprint": "fp-1"},
        "prompt": {"prompt": "lo-fi jazz"}
    })
}

const ROUTE_OK_INSTRUMENTAL: &str = r#"{"is_okay": true, "instrumental": true, "duration": null}"#;

// === Scenarios ===

#[tokio::test]
async fn test_happy_path_instrumental() {
    let harness = harness_with(ScriptedChat::new(&[ROUTE_OK_INSTRUMENTAL]), 0, 0, vec![]).await;

    let (status, body) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session_json())))
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    // Anonymized view: URLs present and distinct, system identity gone,
    // content checksums preserved.
    let a_url = body["a_audio_url"].as_str().unwrap();
    let b_url = body["b_audio_url"].as_str().unwrap();
    assert!(!a_url.is_empty() && !b_url.is_empty());
    assert_ne!(a_url, b_url);
    assert!(body["a_metadata"]["system_key"].is_null());
    assert!(body["b_metadata"]["system_key"].is_null());
    assert!(body["a_metadata"]["checksum"].is_string());
    assert!(body["b_metadata"]["checksum"].is_string());
    assert!(body["timings"].as_array().unwrap().is_empty());
    assert!(body["prompt_routed"].as_bool().unwrap());

    // Stored record keeps the full, non-anonymized state.
    let uuid = body["uuid"].as_str().unwrap();
    let stored = harness.stored_battle(uuid);
    let a_meta = stored.a_metadata.unwrap();
    let b_meta = stored.b_metadata.unwrap();
    assert!(a_meta.system_key.is_some());
    assert!(b_meta.system_key.is_some());
    assert_ne!(a_meta.system_key, b_meta.system_key);
    assert_eq!(a_meta.sample_rate, Some(44100));
    assert!(stored.vote.is_none());
    assert!(stored.prompt_user.unwrap().salted_ip.is_some());

    let labels: Vec<&str> = stored.timings.labels().collect();
    for expected in [
        "parse",
        "generate",
        "sample_pair",
        "generate_parallel_start",
        "generate_parallel_end",
        "create_battle_obj",
        "upload_audio",
        "upload_metadata",
    ] {
        assert!(labels.contains(&expected), "missing label {}", expected);
    }
    // Persisted before anonymization happens.
    assert!(!labels.contains(&"anonymizing"));

    // Both audio blobs on disk under the original- prefix.
    let audio_files = harness.stored_files("audio");
    assert_eq!(audio_files.len(), 2);
    assert!(audio_files.iter().all(|f| f.starts_with("original-")));
}

#[tokio::test]
async fn test_moderation_rejection() {
    let harness = harness_with(
        ScriptedChat::new(&[r#"{"is_okay": false, "rationale": "Insensitive"}"#]),
        0,
        0,
        vec![],
    )
    .await;

    let mut body = generate_body(&session_json());
    body["prompt"] = json!({"prompt": "song that uses racial slurs"});
    let (status, response) = harness.request("POST", "/generate_battle", Some(body)).await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(response["error"], "Insensitive");

    // Nothing persisted on refusal.
    assert!(harness.stored_files("audio").is_empty());
    assert!(harness.stored_files("metadata").is_empty());
}

#[tokio::test]
async fn test_worker_retry_success() {
    // Worker A fails its first generate, succeeds on the retry.
    let harness = harness_with(ScriptedChat::new(&[ROUTE_OK_INSTRUMENTAL]), 1, 0, vec![]).await;

    let (status, body) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session_json())))
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let stored = harness.stored_battle(body["uuid"].as_str().unwrap());
    let mut by_system: HashMap<SystemKey, u32> = HashMap::new();
    for meta in [stored.a_metadata.unwrap(), stored.b_metadata.unwrap()] {
        by_system.insert(
            meta.system_key.clone().unwrap(),
            meta.gateway_num_retries.unwrap(),
        );
    }
    assert_eq!(by_system[&harness.sys_a], 1);
    assert_eq!(by_system[&harness.sys_b], 0);
}

#[tokio::test]
async fn test_worker_hard_failure() {
    // Worker B fails every attempt; with num_retries = 1 that is 2 tries.
    let harness = harness_with(ScriptedChat::new(&[ROUTE_OK_INSTRUMENTAL]), 0, u32::MAX, vec![]).await;

    let (status, body) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session_json())))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("sysb:v1"), "message: {}", message);
    assert!(message.contains("2 attempts"), "message: {}", message);

    // No partial state: neither audio nor metadata was written.
    assert!(harness.stored_files("audio").is_empty());
    assert!(harness.stored_files("metadata").is_empty());
}

#[tokio::test]
async fn test_vote_recording_and_duplicate_overwrite() {
    let harness = harness_with(ScriptedChat::new(&[ROUTE_OK_INSTRUMENTAL]), 0, 0, vec![]).await;
    let session = session_json();

    let (status, battle) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let uuid = battle["uuid"].as_str().unwrap().to_string();
    let stored = harness.stored_battle(&uuid);
    let a_key = stored.a_metadata.unwrap().system_key.unwrap();
    let b_key = stored.b_metadata.unwrap().system_key.unwrap();

    // First vote: preference A.
    let vote_body = json!({
        "session": session,
        "user": {"ip": "10.0.0.1", "fingerprint": "fp-1"},
        "battle_uuid": uuid,
        "vote": {
            "a_listen_data": [["PLAY", 1700000010.0], ["PAUSE", 1700000020.0]],
            "b_listen_data": [["PLAY", 1700000021.0], ["STOP", 1700000030.0]],
            "preference": "A",
            "preference_time": 1700000031.0
        }
    });
    let (status, response) = harness.request("POST", "/record_vote", Some(vote_body)).await;
    assert_eq!(status, StatusCode::OK, "body: {}", response);
    let winner: SystemKey = serde_json::from_value(response["winner"].clone()).unwrap();
    assert_eq!(winner, a_key);
    // Vote responses reveal the full metadata.
    assert!(response["a_metadata"]["system_key"].is_object());

    let stored = harness.stored_battle(&uuid);
    let vote = stored.vote.clone().unwrap();
    assert_eq!(vote.preference, Some(clash_common::Preference::A));
    assert!(stored.vote_user.is_some());
    assert!(stored.vote_session.is_some());

    // Duplicate vote overwrites (warn-only) and reports the new winner.
    let dup_body = json!({
        "session": session,
        "user": {"ip": "10.0.0.1", "fingerprint": "fp-1"},
        "battle_uuid": uuid,
        "vote": {"preference": "B", "preference_time": 1700000050.0}
    });
    let (status, response) = harness.request("POST", "/record_vote", Some(dup_body)).await;
    assert_eq!(status, StatusCode::OK);
    let winner: SystemKey = serde_json::from_value(response["winner"].clone()).unwrap();
    assert_eq!(winner, b_key);

    let stored = harness.stored_battle(&uuid);
    assert_eq!(
        stored.vote.unwrap().preference,
        Some(clash_common::Preference::B)
    );
}

#[tokio::test]
async fn test_tie_vote_has_no_winner() {
    let harness = harness_with(ScriptedChat::new(&[ROUTE_OK_INSTRUMENTAL]), 0, 0, vec![]).await;
    let session = session_json();
    let (_, battle) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session)))
        .await;
    let uuid = battle["uuid"].as_str().unwrap();

    let vote_body = json!({
        "session": session,
        "user": {"ip": "10.0.0.1"},
        "battle_uuid": uuid,
        "vote": {"preference": "TIE", "preference_time": 1700000031.0}
    });
    let (status, response) = harness.request("POST", "/record_vote", Some(vote_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response["winner"].is_null());
}

// === Route-level validation and lookups ===

#[tokio::test]
async fn test_systems_route_lists_catalog() {
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;
    let (status, body) = harness.request("GET", "/systems", None).await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<SystemKey> = serde_json::from_value(body).unwrap();
    assert_eq!(keys, vec![harness.sys_a.clone(), harness.sys_b.clone()]);
}

#[tokio::test]
async fn test_prebaked_route_maps_by_checksum() {
    let prompt = DetailedPrompt::new("heavy metal", true, None, None, None).unwrap();
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![prompt]).await;

    let (status, body) = harness.request("GET", "/prebaked", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["f09577079db8a81f475ae94e85ddd3a7"]["instrumental"]
        .as_bool()
        .unwrap());
}

#[tokio::test]
async fn test_missing_session_fields_reject_with_400() {
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;

    // Missing session key entirely.
    let (status, body) = harness
        .request(
            "POST",
            "/generate_battle",
            Some(json!({"user": {}, "prompt": {"prompt": "x"}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "session is required");

    // Session present but incomplete.
    let mut session = session_json();
    session.as_object_mut().unwrap().remove("ack_tos");
    let (status, body) = harness
        .request("POST", "/generate_battle", Some(generate_body(&session)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ack_tos"));
}

#[tokio::test]
async fn test_vote_for_unknown_battle_is_404() {
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;
    let vote_body = json!({
        "session": session_json(),
        "user": {"ip": "10.0.0.1"},
        "battle_uuid": Uuid::new_v4(),
        "vote": {"preference": "A", "preference_time": 1700000031.0}
    });
    let (status, _) = harness.request("POST", "/record_vote", Some(vote_body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_detailed_prompt_short_circuits_routing() {
    // The chat script is empty: any routing attempt would fail loudly.
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;

    let body = json!({
        "session": session_json(),
        "user": {"ip": "10.0.0.1"},
        "prompt_detailed": {"overall_prompt": "heavy metal", "instrumental": true}
    });
    let (status, response) = harness.request("POST", "/generate_battle", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "body: {}", response);
    assert!(!response["prompt_routed"].as_bool().unwrap());
}

#[tokio::test]
async fn test_prebaked_prompt_uses_prebaked_key_prefix() {
    let prompt = DetailedPrompt::new("heavy metal", true, None, None, None).unwrap();
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![prompt.clone()]).await;

    let body = json!({
        "session": session_json(),
        "user": {"ip": "10.0.0.1"},
        "prompt_detailed": serde_json::to_value(&prompt).unwrap()
    });
    let (status, response) = harness.request("POST", "/generate_battle", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "body: {}", response);
    assert!(response["prompt_prebaked"].as_bool().unwrap());

    let audio_files = harness.stored_files("audio");
    assert_eq!(audio_files.len(), 2);
    assert!(audio_files.iter().all(|f| f.starts_with("prebaked-")));
    assert!(audio_files
        .iter()
        .all(|f| f.contains("f09577079db8a81f475ae94e85ddd3a7")));
}

#[tokio::test]
async fn test_health_check_runs_prebaked_battle() {
    let prompt = DetailedPrompt::new("heavy metal", true, None, None, None).unwrap();
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![prompt]).await;

    let (status, body) = harness.request("GET", "/health_check", None).await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["status"], "ok");

    let stored = harness.stored_battle(body["uuid"].as_str().unwrap());
    assert!(stored.prompt_prebaked);
    assert!(stored.prompt_user.is_none());
    assert!(stored.a_audio_url.is_some());
}

#[tokio::test]
async fn test_health_check_without_prebaked_prompts_is_500() {
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;
    let (status, body) = harness.request("GET", "/health_check", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("prebaked"));
}

#[tokio::test]
async fn test_instrumental_lyrics_conflict_is_400() {
    let harness = harness_with(ScriptedChat::empty(), 0, 0, vec![]).await;
    let body = json!({
        "session": session_json(),
        "user": {"ip": "10.0.0.1"},
        "prompt_detailed": {"overall_prompt": "x", "instrumental": true, "lyrics": "la"}
    });
    let (status, response) = harness.request("POST", "/generate_battle", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"]
        .as_str()
        .unwrap()
        .contains("prompt_detailed"));
}
