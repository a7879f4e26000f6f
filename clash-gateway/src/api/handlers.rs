//! API request handlers
//!
//! Every mutating route runs the same pre-flight: parse the envelope
//! manually (field-precise 400s), validate the session's required fields,
//! salt the incoming user. Handlers log the error kind plus battle,
//! session, and user identifiers before returning any failure.

use crate::bucket::PutOptions;
use crate::error::GatewayError;
use crate::generator::BattleRequest;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use clash_common::salt::UserSalt;
use clash_common::time::Timings;
use clash_common::{
    Battle, DetailedPrompt, Preference, ResponseMetadata, Session, SimplePrompt, Slot, SystemKey,
    User, UserWire, Vote,
};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Response for `/record_vote`.
#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub winner: Option<SystemKey>,
    pub a_metadata: Option<ResponseMetadata>,
    pub b_metadata: Option<ResponseMetadata>,
}

// === Parsing helpers ===

fn parse_field<T: DeserializeOwned>(data: &Value, key: &str) -> Result<T, GatewayError> {
    let raw = match data.get(key) {
        None | Some(Value::Null) => {
            return Err(GatewayError::InvalidRequest(format!("{} is required", key)))
        }
        Some(raw) => raw,
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid {} data: {}", key, e)))
}

fn parse_session(data: &Value) -> Result<Session, GatewayError> {
    let session: Session = parse_field(data, "session")?;
    let missing = session.missing_fields();
    if !missing.is_empty() {
        return Err(GatewayError::InvalidRequest(format!(
            "session is missing required fields: {:?}",
            missing
        )));
    }
    Ok(session)
}

fn parse_user(data: &Value, salt: &UserSalt) -> Result<User, GatewayError> {
    let wire: UserWire = parse_field(data, "user")?;
    Ok(User::from_wire(wire, salt))
}

fn parse_vote(data: &Value) -> Result<Vote, GatewayError> {
    let vote: Vote = parse_field(data, "vote")?;
    let missing = vote.missing_fields();
    if !missing.is_empty() {
        return Err(GatewayError::InvalidRequest(format!(
            "vote is missing required fields: {:?}",
            missing
        )));
    }
    Ok(vote)
}

fn parse_battle_uuid(data: &Value) -> Result<Uuid, GatewayError> {
    parse_field(data, "battle_uuid")
}

// Fail a configurable fraction of requests; a no-op at 0.0.
fn inject_flakiness(flakiness: f64) -> Result<(), GatewayError> {
    if flakiness > 0.0 && rand::thread_rng().gen::<f64>() < flakiness {
        warn!("flaky error injected");
        return Err(GatewayError::InjectedFailure);
    }
    Ok(())
}

// === Read-only routes ===

/// GET /systems - keys of the active catalog
pub async fn systems(State(state): State<AppState>) -> Result<Json<Vec<SystemKey>>, GatewayError> {
    inject_flakiness(state.flakiness)?;
    Ok(Json(state.generator.systems()))
}

/// GET /prebaked - prompt checksum → curated detailed prompt
pub async fn prebaked(
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, DetailedPrompt>>, GatewayError> {
    inject_flakiness(state.flakiness)?;
    Ok(Json(state.prebaked.as_ref().clone()))
}

// === POST /generate_battle ===

pub async fn generate_battle(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> Result<Json<Battle>, GatewayError> {
    let mut timings = Timings::new();
    timings.mark("parse");

    let parsed = parse_generate_request(&state, &data).map_err(|e| {
        error!(kind = e.kind(), error = %e, "generate_battle request rejected");
        e
    })?;
    let GenerateRequestParts {
        session,
        user,
        prompt,
        prompt_detailed,
        prompt_prebaked,
    } = parsed;

    let battle_uuid = Uuid::new_v4();
    let session_uuid = session.uuid;
    let user_checksum = user.checksum();
    if user.is_untracked() {
        warn!(battle = %battle_uuid, session = ?session_uuid, "user has no tracking information");
    }

    let result = run_generate_battle(
        &state,
        session,
        user,
        prompt,
        prompt_detailed,
        prompt_prebaked,
        battle_uuid,
        &mut timings,
    )
    .await;

    match result {
        Ok(battle) => Ok(Json(battle)),
        Err(err) => {
            error!(
                kind = err.kind(),
                battle = %battle_uuid,
                session = ?session_uuid,
                user = %user_checksum,
                error = %err,
                "generate_battle failed"
            );
            Err(err)
        }
    }
}

struct GenerateRequestParts {
    session: Session,
    user: User,
    prompt: Option<SimplePrompt>,
    prompt_detailed: Option<DetailedPrompt>,
    prompt_prebaked: bool,
}

fn parse_generate_request(
    state: &AppState,
    data: &Value,
) -> Result<GenerateRequestParts, GatewayError> {
    let session = parse_session(data)?;
    let user = parse_user(data, &state.salt)?;

    // A supplied detailed prompt short-circuits routing entirely.
    let (prompt, prompt_detailed, prompt_prebaked) =
        if data.get("prompt_detailed").is_some_and(|v| !v.is_null()) {
            let detailed: DetailedPrompt = parse_field(data, "prompt_detailed")?;
            let prebaked = state.prebaked.contains_key(&detailed.checksum());
            (None, Some(detailed), prebaked)
        } else {
            let prompt: SimplePrompt = parse_field(data, "prompt")?;
            (Some(prompt), None, false)
        };

    Ok(GenerateRequestParts {
        session,
        user,
        prompt,
        prompt_detailed,
        prompt_prebaked,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_generate_battle(
    state: &AppState,
    session: Session,
    user: User,
    prompt: Option<SimplePrompt>,
    prompt_detailed: Option<DetailedPrompt>,
    prompt_prebaked: bool,
    battle_uuid: Uuid,
    timings: &mut Timings,
) -> Result<Battle, GatewayError> {
    inject_flakiness(state.flakiness)?;

    info!(
        battle = %battle_uuid,
        prompt = ?prompt.as_ref().map(|p| p.prompt.as_str()),
        prompt_detailed = ?prompt_detailed,
        prompt_prebaked,
        "generating battle"
    );

    timings.mark("generate");
    let generated = state
        .generator
        .generate_battle(
            BattleRequest {
                prompt,
                prompt_detailed,
                user: Some(user),
                session: Some(session),
                battle_uuid,
                prompt_prebaked,
            },
            timings,
        )
        .await?;

    if let (Some(a), Some(b)) = (&generated.battle.a_metadata, &generated.battle.b_metadata) {
        info!(
            battle = %battle_uuid,
            a_system = %a.system_key.as_ref().map(|k| k.to_string()).unwrap_or_default(),
            a_audio_mb = a.size_bytes.unwrap_or(0) as f64 / 1024.0 / 1024.0,
            b_system = %b.system_key.as_ref().map(|k| k.to_string()).unwrap_or_default(),
            b_audio_mb = b.size_bytes.unwrap_or(0) as f64 / 1024.0 / 1024.0,
            "battle generated"
        );
    }

    let battle = upload_and_store(state, generated, timings).await?;

    timings.mark("anonymizing");
    Ok(battle.anonymize())
}

// Shared by /generate_battle and /health_check: upload both clips, attach
// public URLs, then persist the record with its sorted timing log. The
// stored timings end at upload_metadata; later labels belong only to the
// response path.
async fn upload_and_store(
    state: &AppState,
    generated: crate::generator::GeneratedBattle,
    timings: &mut Timings,
) -> Result<Battle, GatewayError> {
    let crate::generator::GeneratedBattle {
        mut battle,
        a_audio,
        b_audio,
    } = generated;

    let Some(detailed) = battle.prompt_detailed.clone() else {
        return Err(GatewayError::Internal(
            "generated battle has no detailed prompt".to_string(),
        ));
    };

    timings.mark("upload_audio");
    let a_key = state.audio_key(&detailed, &battle.uuid, Slot::A);
    let b_key = state.audio_key(&detailed, &battle.uuid, Slot::B);
    state
        .bucket_audio
        .put(&a_key, &a_audio, PutOptions::audio())
        .await
        .map_err(|e| GatewayError::Storage(format!("audio upload: {}", e)))?;
    state
        .bucket_audio
        .put(&b_key, &b_audio, PutOptions::audio())
        .await
        .map_err(|e| GatewayError::Storage(format!("audio upload: {}", e)))?;
    battle.a_audio_url = Some(
        state
            .bucket_audio
            .get_url(&a_key)
            .map_err(|e| GatewayError::Storage(e.to_string()))?,
    );
    battle.b_audio_url = Some(
        state
            .bucket_audio
            .get_url(&b_key)
            .map_err(|e| GatewayError::Storage(e.to_string()))?,
    );

    timings.mark("upload_metadata");
    timings.sort_by_time();
    battle.timings = timings.clone();
    state.store_battle(&battle).await?;

    Ok(battle)
}

// === POST /record_vote ===

pub async fn record_vote(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> Result<Json<VoteResponse>, GatewayError> {
    let parsed = parse_vote_request(&state, &data).map_err(|e| {
        error!(kind = e.kind(), error = %e, "record_vote request rejected");
        e
    })?;
    let (session, user, battle_uuid, vote) = parsed;

    let session_uuid = session.uuid;
    let user_checksum = user.checksum();
    if user.is_untracked() {
        warn!(battle = %battle_uuid, session = ?session_uuid, "user has no tracking information");
    }

    let result = run_record_vote(&state, session, user, battle_uuid, vote).await;
    match result {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!(
                kind = err.kind(),
                battle = %battle_uuid,
                session = ?session_uuid,
                user = %user_checksum,
                error = %err,
                "record_vote failed"
            );
            Err(err)
        }
    }
}

fn parse_vote_request(
    state: &AppState,
    data: &Value,
) -> Result<(Session, User, Uuid, Vote), GatewayError> {
    let session = parse_session(data)?;
    let user = parse_user(data, &state.salt)?;
    let battle_uuid = parse_battle_uuid(data)?;
    let vote = parse_vote(data)?;
    Ok((session, user, battle_uuid, vote))
}

async fn run_record_vote(
    state: &AppState,
    session: Session,
    user: User,
    battle_uuid: Uuid,
    vote: Vote,
) -> Result<VoteResponse, GatewayError> {
    inject_flakiness(state.flakiness)?;

    let mut battle = state.load_battle(&battle_uuid).await?;
    battle.timings.mark("vote");

    // Mismatches and duplicate votes are recorded, not refused; the
    // offline analysis decides what to do with them.
    if let Some(prompt_user) = &battle.prompt_user {
        if user.checksum() != prompt_user.checksum() {
            warn!(
                battle = %battle_uuid,
                vote_user = %user.checksum(),
                prompt_user = %prompt_user.checksum(),
                "vote user does not match prompt user"
            );
        }
    }
    if let Some(prompt_session) = &battle.prompt_session {
        if session.uuid != prompt_session.uuid {
            warn!(
                battle = %battle_uuid,
                vote_session = ?session.uuid,
                prompt_session = ?prompt_session.uuid,
                "vote session does not match prompt session"
            );
        }
    }
    if battle.vote.is_some() {
        warn!(battle = %battle_uuid, "battle already has a vote, overwriting");
    }

    let preference = vote.preference;
    battle.vote = Some(vote);
    battle.vote_user = Some(user);
    battle.vote_session = Some(session);

    // The vote response is still useful when the store write fails; the
    // next vote or replay can repair the record.
    if let Err(err) = state.store_battle(&battle).await {
        error!(battle = %battle_uuid, error = %err, "failed to persist vote");
    }

    let winner = match preference {
        Some(Preference::A) => battle.a_metadata.as_ref().and_then(|m| m.system_key.clone()),
        Some(Preference::B) => battle.b_metadata.as_ref().and_then(|m| m.system_key.clone()),
        _ => None,
    };

    Ok(VoteResponse {
        winner,
        a_metadata: battle.a_metadata,
        b_metadata: battle.b_metadata,
    })
}

// === GET /health_check ===

/// Runs a full synthetic battle on a random prebaked prompt. Safe at
/// scale, but every call leaves a real battle record (tagged
/// `prompt_prebaked`) in the store.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let battle_uuid = Uuid::new_v4();
    let result = run_health_check(&state, battle_uuid).await;
    match result {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!(kind = err.kind(), battle = %battle_uuid, error = %err, "health_check failed");
            Err(err)
        }
    }
}

async fn run_health_check(state: &AppState, battle_uuid: Uuid) -> Result<Value, GatewayError> {
    let prompt_detailed = {
        let prompts: Vec<&DetailedPrompt> = state.prebaked.values().collect();
        if prompts.is_empty() {
            return Err(GatewayError::Internal(
                "no prebaked prompts available for health check".to_string(),
            ));
        }
        let index = rand::thread_rng().gen_range(0..prompts.len());
        prompts[index].clone()
    };

    let mut timings = Timings::new();
    timings.mark("generate");
    let generated = state
        .generator
        .generate_battle(
            BattleRequest {
                prompt: None,
                prompt_detailed: Some(prompt_detailed),
                user: None,
                session: None,
                battle_uuid,
                prompt_prebaked: true,
            },
            &mut timings,
        )
        .await?;

    let battle = upload_and_store(state, generated, &mut timings).await?;

    Ok(json!({ "status": "ok", "uuid": battle.uuid }))
}
