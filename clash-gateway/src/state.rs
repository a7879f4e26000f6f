//! Shared application state
//!
//! Everything the handlers need, cheap to clone. The registry, prebaked
//! map, and generator are immutable after startup; the battle cache is the
//! only mutable structure and sits behind a single async mutex.

use crate::bucket::{Bucket, PutOptions};
use crate::cache::BattleCache;
use crate::error::GatewayError;
use crate::generator::BattleGenerator;
use clash_common::salt::UserSalt;
use clash_common::{Battle, DetailedPrompt, Slot};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<BattleGenerator>,
    pub bucket_audio: Arc<Bucket>,
    pub bucket_metadata: Arc<Bucket>,
    pub battles: Arc<Mutex<BattleCache>>,
    /// Prompt checksum → curated prompt, loaded once at startup.
    pub prebaked: Arc<HashMap<String, DetailedPrompt>>,
    pub salt: Arc<UserSalt>,
    /// Fraction of requests to fail synthetically; 0.0 disables.
    pub flakiness: f64,
}

impl AppState {
    /// Persist a battle: cache write plus metadata-bucket write. The
    /// bucket is the source of truth; the cache is best effort.
    pub async fn store_battle(&self, battle: &Battle) -> Result<(), GatewayError> {
        self.battles.lock().await.insert(battle.clone());

        let document = battle
            .to_pretty_json()
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        self.bucket_metadata
            .put(
                &format!("{}.json", battle.uuid),
                document.as_bytes(),
                PutOptions::metadata(),
            )
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fetch a battle by uuid: cache first, then the metadata bucket.
    pub async fn load_battle(&self, uuid: &uuid::Uuid) -> Result<Battle, GatewayError> {
        if let Some(battle) = self.battles.lock().await.get(uuid) {
            return Ok(battle.clone());
        }

        let key = format!("{}.json", uuid);
        let bytes = self.bucket_metadata.get(&key).await.map_err(|e| match e {
            crate::bucket::BucketError::NotFound(_) => GatewayError::NotFound(uuid.to_string()),
            other => GatewayError::Storage(other.to_string()),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Storage(format!("corrupt battle record {}: {}", key, e)))
    }

    /// Object-store key for one audio slot.
    pub fn audio_key(&self, prompt: &DetailedPrompt, battle_uuid: &uuid::Uuid, slot: Slot) -> String {
        let checksum = prompt.checksum();
        let prefix = if self.prebaked.contains_key(&checksum) {
            "prebaked"
        } else {
            "original"
        };
        format!("{}-{}-{}-{}.mp3", prefix, checksum, battle_uuid, slot.as_str())
    }
}

/// Load the prebaked prompt map from a JSON array file.
///
/// An absent file is not an error: the gateway runs with an empty map and
/// `/health_check` reports a diagnostic instead.
pub fn load_prebaked(path: &Path) -> clash_common::Result<HashMap<String, DetailedPrompt>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "prebaked prompt file not found, using empty map");
            return Ok(HashMap::new());
        }
        Err(e) => return Err(e.into()),
    };

    let prompts: Vec<DetailedPrompt> = serde_json::from_str(&content).map_err(|e| {
        clash_common::Error::Config(format!("invalid prebaked file {}: {}", path.display(), e))
    })?;

    let mut map = HashMap::new();
    for prompt in prompts {
        let checksum = prompt.checksum();
        if map.insert(checksum.clone(), prompt).is_some() {
            return Err(clash_common::Error::Config(format!(
                "duplicate prebaked prompt checksum {}",
                checksum
            )));
        }
    }
    tracing::info!(count = map.len(), "loaded prebaked prompts");
    Ok(map)
}
