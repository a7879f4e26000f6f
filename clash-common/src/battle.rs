//! Battle records: sessions, users, votes, and the battle aggregate
//!
//! A `Battle` is one A/B encounter: one prompt, two generated clips,
//! optionally one vote. The gateway mutates the record exactly twice (after
//! generation and on vote) and persists the whole JSON document to the
//! metadata store after each mutation; the in-memory copy is only a cache.

use crate::checksum::json_checksum;
use crate::prompt::{DetailedPrompt, SimplePrompt};
use crate::salt::UserSalt;
use crate::system::SystemKey;
use crate::time::{unix_now, Timings};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Audio slot within a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }
}

/// Voter preference between the two slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Preference {
    A,
    B,
    Tie,
    BothBad,
}

/// Player interaction event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenEventKind {
    Play,
    Pause,
    Stop,
    Tick,
}

/// One player event: `["PLAY", unix_seconds]` on the wire.
pub type ListenEvent = (ListenEventKind, f64);

/// Total audible time from a per-slot event sequence.
///
/// PLAY starts an interval; PAUSE and TICK close it (TICK immediately opens
/// a new one at its own timestamp); STOP is ignored. Negative intervals
/// contribute zero.
pub fn sum_listen_time(events: &[ListenEvent]) -> f64 {
    let mut last_play: Option<f64> = None;
    let mut total = 0.0;
    for &(kind, timestamp) in events {
        match kind {
            ListenEventKind::Play => last_play = Some(timestamp),
            ListenEventKind::Pause | ListenEventKind::Tick => {
                if let Some(start) = last_play {
                    let interval = timestamp - start;
                    if interval > 0.0 {
                        total += interval;
                    }
                    last_play = match kind {
                        ListenEventKind::Pause => None,
                        _ => Some(timestamp),
                    };
                }
            }
            ListenEventKind::Stop => {}
        }
    }
    total
}

/// Client session descriptor, created by the frontend.
///
/// Mutating routes require `uuid`, `create_time`, `frontend_version`, and
/// `ack_tos` to be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub create_time: Option<f64>,
    #[serde(default)]
    pub frontend_version: Option<String>,
    /// Checksum of the terms-of-service text the user acknowledged.
    #[serde(default)]
    pub ack_tos: Option<String>,
    #[serde(default)]
    pub new_battle_times: Vec<f64>,
}

impl Session {
    /// Names of the required fields that are missing, empty when valid.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.uuid.is_none() {
            missing.push("uuid");
        }
        if self.create_time.is_none() {
            missing.push("create_time");
        }
        if self.frontend_version.is_none() {
            missing.push("frontend_version");
        }
        if self.ack_tos.is_none() {
            missing.push("ack_tos");
        }
        missing
    }
}

/// Pseudonymous user identity.
///
/// Only salted hashes are ever stored; raw IPs and fingerprints are
/// consumed by [`User::from_wire`] and discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub salted_ip: Option<String>,
    #[serde(default)]
    pub salted_fingerprint: Option<String>,
}

/// Wire shape of a user: clients may send raw values, stored records carry
/// salted ones. Parsed at the API boundary, never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserWire {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub salted_ip: Option<String>,
    #[serde(default)]
    pub salted_fingerprint: Option<String>,
}

impl User {
    /// Construct from raw identifiers, salting immediately.
    pub fn new(ip: Option<&str>, fingerprint: Option<&str>, salt: &UserSalt) -> Self {
        Self {
            salted_ip: ip.map(|v| salt.hash(v)),
            salted_fingerprint: fingerprint.map(|v| salt.hash(v)),
        }
    }

    /// Convert a wire user into a stored user. Raw values win over any
    /// salted values the client also sent.
    pub fn from_wire(wire: UserWire, salt: &UserSalt) -> Self {
        Self {
            salted_ip: wire.ip.as_deref().map(|v| salt.hash(v)).or(wire.salted_ip),
            salted_fingerprint: wire
                .fingerprint
                .as_deref()
                .map(|v| salt.hash(v))
                .or(wire.salted_fingerprint),
        }
    }

    /// Stable identity hash over the two salted fields (nulls included).
    pub fn checksum(&self) -> String {
        json_checksum(&json!({
            "salted_ip": self.salted_ip,
            "salted_fingerprint": self.salted_fingerprint,
        }))
    }

    /// True when the user carries neither identifier.
    pub fn is_untracked(&self) -> bool {
        self.salted_ip.is_none() && self.salted_fingerprint.is_none()
    }
}

/// Per-battle vote, built incrementally by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(default)]
    pub a_listen_data: Vec<ListenEvent>,
    #[serde(default)]
    pub b_listen_data: Vec<ListenEvent>,
    #[serde(default)]
    pub preference: Option<Preference>,
    #[serde(default)]
    pub preference_time: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub a_feedback: Option<String>,
    #[serde(default)]
    pub b_feedback: Option<String>,
    #[serde(default)]
    pub feedback_time: Option<f64>,
}

impl Vote {
    /// Record a player event against a slot at the current wall clock.
    pub fn record(&mut self, slot: Slot, kind: ListenEventKind) {
        let events = match slot {
            Slot::A => &mut self.a_listen_data,
            Slot::B => &mut self.b_listen_data,
        };
        events.push((kind, unix_now()));
    }

    /// Set the preference; stamps `preference_time` on first assignment.
    pub fn set_preference(&mut self, preference: Preference) {
        self.preference = Some(preference);
        if self.preference_time.is_none() {
            self.preference_time = Some(unix_now());
        }
    }

    /// Attach free-text feedback; stamps `feedback_time` on first assignment.
    pub fn set_feedback(&mut self, slot: Option<Slot>, text: impl Into<String>) {
        let text = text.into();
        match slot {
            None => self.feedback = Some(text),
            Some(Slot::A) => self.a_feedback = Some(text),
            Some(Slot::B) => self.b_feedback = Some(text),
        }
        if self.feedback_time.is_none() {
            self.feedback_time = Some(unix_now());
        }
    }

    pub fn listen_time(&self, slot: Slot) -> f64 {
        match slot {
            Slot::A => sum_listen_time(&self.a_listen_data),
            Slot::B => sum_listen_time(&self.b_listen_data),
        }
    }

    /// Names of the required fields that are missing, empty when valid.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.preference.is_none() {
            missing.push("preference");
        }
        if self.preference_time.is_none() {
            missing.push("preference_time");
        }
        missing
    }
}

/// Everything a worker call produced besides the audio bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub system_key: Option<SystemKey>,
    #[serde(default)]
    pub system_git_hash: Option<String>,
    #[serde(default)]
    pub system_time_queued: Option<f64>,
    #[serde(default)]
    pub system_time_started: Option<f64>,
    #[serde(default)]
    pub system_time_completed: Option<f64>,
    #[serde(default)]
    pub gateway_time_started: Option<f64>,
    #[serde(default)]
    pub gateway_time_completed: Option<f64>,
    #[serde(default)]
    pub gateway_num_retries: Option<u32>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub num_channels: Option<u16>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl ResponseMetadata {
    /// Redacted copy safe to return before a vote: everything identifying
    /// the system is dropped, lyrics and the content checksum survive.
    pub fn anonymize(&self) -> Self {
        Self {
            lyrics: self.lyrics.clone(),
            checksum: self.checksum.clone(),
            ..Self::default()
        }
    }
}

/// The root aggregate: one prompt, two clips, at most one vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub uuid: Uuid,
    #[serde(default)]
    pub gateway_version: Option<String>,
    #[serde(default)]
    pub prompt: Option<SimplePrompt>,
    #[serde(default)]
    pub prompt_detailed: Option<DetailedPrompt>,
    #[serde(default)]
    pub prompt_user: Option<User>,
    #[serde(default)]
    pub prompt_session: Option<Session>,
    #[serde(default)]
    pub prompt_prebaked: bool,
    #[serde(default)]
    pub prompt_routed: bool,
    #[serde(default)]
    pub a_audio_url: Option<String>,
    #[serde(default)]
    pub a_metadata: Option<ResponseMetadata>,
    #[serde(default)]
    pub b_audio_url: Option<String>,
    #[serde(default)]
    pub b_metadata: Option<ResponseMetadata>,
    #[serde(default)]
    pub vote: Option<Vote>,
    #[serde(default)]
    pub vote_user: Option<User>,
    #[serde(default)]
    pub vote_session: Option<Session>,
    #[serde(default)]
    pub timings: Timings,
}

impl Battle {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            gateway_version: None,
            prompt: None,
            prompt_detailed: None,
            prompt_user: None,
            prompt_session: None,
            prompt_prebaked: false,
            prompt_routed: false,
            a_audio_url: None,
            a_metadata: None,
            b_audio_url: None,
            b_metadata: None,
            vote: None,
            vote_user: None,
            vote_session: None,
            timings: Timings::new(),
        }
    }

    /// Copy with per-slot system identity and internal timings redacted,
    /// for return to clients that have not voted yet.
    pub fn anonymize(&self) -> Self {
        Self {
            a_metadata: self.a_metadata.as_ref().map(ResponseMetadata::anonymize),
            b_metadata: self.b_metadata.as_ref().map(ResponseMetadata::anonymize),
            timings: Timings::new(),
            ..self.clone()
        }
    }

    /// Human-readable JSON document as stored in the metadata bucket.
    pub fn to_pretty_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::Error::Internal(format!("battle serialization: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_salt() -> UserSalt {
        UserSalt::new("test-salt")
    }

    #[test]
    fn test_preference_wire_values() {
        assert_eq!(
            serde_json::to_value(Preference::BothBad).unwrap(),
            serde_json::json!("BOTH_BAD")
        );
        assert_eq!(
            serde_json::to_value(Preference::Tie).unwrap(),
            serde_json::json!("TIE")
        );
        let p: Preference = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(p, Preference::A);
    }

    #[test]
    fn test_listen_event_wire_shape() {
        let events: Vec<ListenEvent> = vec![(ListenEventKind::Play, 1.5)];
        let json = serde_json::to_value(&events).unwrap();
        assert_eq!(json, serde_json::json!([["PLAY", 1.5]]));
        let back: Vec<ListenEvent> = serde_json::from_value(json).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn test_sum_listen_time_play_pause() {
        let events = vec![
            (ListenEventKind::Play, 10.0),
            (ListenEventKind::Pause, 14.5),
        ];
        assert_eq!(sum_listen_time(&events), 4.5);
    }

    #[test]
    fn test_sum_listen_time_ignores_stop() {
        let events = vec![
            (ListenEventKind::Play, 10.0),
            (ListenEventKind::Stop, 12.0),
            (ListenEventKind::Pause, 14.5),
        ];
        assert_eq!(sum_listen_time(&events), 4.5);
    }

    #[test]
    fn test_sum_listen_time_tick_chains() {
        let events = vec![
            (ListenEventKind::Play, 10.0),
            (ListenEventKind::Tick, 11.0),
            (ListenEventKind::Tick, 13.0),
        ];
        assert_eq!(sum_listen_time(&events), 3.0);
    }

    #[test]
    fn test_sum_listen_time_negative_interval_is_zero() {
        let events = vec![
            (ListenEventKind::Play, 10.0),
            (ListenEventKind::Pause, 9.0),
        ];
        assert_eq!(sum_listen_time(&events), 0.0);
    }

    #[test]
    fn test_sum_listen_time_pause_without_play() {
        let events = vec![(ListenEventKind::Pause, 9.0), (ListenEventKind::Tick, 10.0)];
        assert_eq!(sum_listen_time(&events), 0.0);
    }

    #[test]
    fn test_session_missing_fields() {
        let session = Session::default();
        assert_eq!(
            session.missing_fields(),
            vec!["uuid", "create_time", "frontend_version", "ack_tos"]
        );

        let session = Session {
            uuid: Some(Uuid::new_v4()),
            create_time: Some(unix_now()),
            frontend_version: Some("abc123".into()),
            ack_tos: Some("tos-v1".into()),
            ..Session::default()
        };
        assert!(session.missing_fields().is_empty());
    }

    #[test]
    fn test_user_salts_raw_values() {
        let user = User::new(Some("192.168.1.1"), Some("fp-1"), &test_salt());
        assert_eq!(
            user.salted_ip.as_deref(),
            Some("3d7c16a221ce6d8f265dc2b679bb3bb4")
        );
        assert!(user.salted_fingerprint.is_some());
        // Raw values are not representable in the stored form at all.
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("192.168.1.1"));
        assert!(!json.contains("fp-1"));
    }

    #[test]
    fn test_user_from_wire_raw_wins() {
        let wire = UserWire {
            ip: Some("192.168.1.1".into()),
            salted_ip: Some("stale".into()),
            ..UserWire::default()
        };
        let user = User::from_wire(wire, &test_salt());
        assert_eq!(
            user.salted_ip.as_deref(),
            Some("3d7c16a221ce6d8f265dc2b679bb3bb4")
        );
    }

    #[test]
    fn test_user_checksum_stable_and_distinct() {
        let salt = test_salt();
        let user1 = User::new(Some("192.168.1.1"), Some("fp"), &salt);
        let user2 = User::new(Some("192.168.1.1"), Some("fp"), &salt);
        assert_eq!(user1.checksum(), user2.checksum());

        let user3 = User::new(Some("192.168.1.2"), Some("fp"), &salt);
        assert_ne!(user1.checksum(), user3.checksum());

        // Fully empty users still hash deterministically.
        let empty = User::default();
        assert_eq!(empty.checksum().len(), 32);
        assert!(empty.is_untracked());
    }

    #[test]
    fn test_vote_preference_time_autofill() {
        let mut vote = Vote::default();
        vote.set_preference(Preference::A);
        let stamped = vote.preference_time.unwrap();
        assert!(stamped > 0.0);

        // Re-assignment keeps the first timestamp.
        vote.set_preference(Preference::B);
        assert_eq!(vote.preference_time, Some(stamped));
        assert_eq!(vote.preference, Some(Preference::B));
    }

    #[test]
    fn test_vote_feedback_time_autofill() {
        let mut vote = Vote::default();
        assert!(vote.feedback_time.is_none());
        vote.set_feedback(Some(Slot::A), "too much cowbell");
        assert!(vote.feedback_time.is_some());
        assert_eq!(vote.a_feedback.as_deref(), Some("too much cowbell"));
    }

    #[test]
    fn test_vote_missing_fields() {
        let vote = Vote::default();
        assert_eq!(vote.missing_fields(), vec!["preference", "preference_time"]);
    }

    #[test]
    fn test_response_metadata_anonymize() {
        let meta = ResponseMetadata {
            system_key: Some(SystemKey::new("musicgen", "small").unwrap()),
            system_git_hash: Some("deadbeef".into()),
            gateway_num_retries: Some(1),
            lyrics: Some("la la".into()),
            checksum: Some("abc".into()),
            ..ResponseMetadata::default()
        };
        let anon = meta.anonymize();
        assert!(anon.system_key.is_none());
        assert!(anon.system_git_hash.is_none());
        assert!(anon.gateway_num_retries.is_none());
        assert_eq!(anon.lyrics.as_deref(), Some("la la"));
        assert_eq!(anon.checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_battle_anonymize_clears_slots_and_timings() {
        let mut battle = Battle::new(Uuid::new_v4());
        battle.a_metadata = Some(ResponseMetadata {
            system_key: Some(SystemKey::new("a", "v").unwrap()),
            checksum: Some("ca".into()),
            ..ResponseMetadata::default()
        });
        battle.b_metadata = Some(ResponseMetadata {
            system_key: Some(SystemKey::new("b", "v").unwrap()),
            checksum: Some("cb".into()),
            ..ResponseMetadata::default()
        });
        battle.timings.mark("parse");

        let anon = battle.anonymize();
        assert!(anon.a_metadata.as_ref().unwrap().system_key.is_none());
        assert!(anon.b_metadata.as_ref().unwrap().system_key.is_none());
        assert_eq!(
            anon.a_metadata.as_ref().unwrap().checksum.as_deref(),
            Some("ca")
        );
        assert!(anon.timings.is_empty());
        // The original is untouched.
        assert_eq!(battle.timings.len(), 1);
    }

    #[test]
    fn test_battle_json_roundtrip_ignores_unknown_fields() {
        let battle = Battle::new(Uuid::new_v4());
        let mut value = serde_json::to_value(&battle).unwrap();
        value["some_future_field"] = serde_json::json!(42);
        let back: Battle = serde_json::from_value(value).unwrap();
        assert_eq!(back.uuid, battle.uuid);
    }
}
