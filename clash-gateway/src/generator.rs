//! Battle generation orchestration
//!
//! End-to-end flow for one battle: route the prompt if only the simple
//! form was supplied, sample an eligible pair, fan out to both workers in
//! parallel, and assemble the battle record. Both workers must succeed;
//! a half-battle has no evaluative value, so either failure aborts the
//! whole operation with nothing persisted.

use crate::error::GatewayError;
use crate::sampler::PairSampler;
use crate::worker::WorkerClient;
use clash_common::chat::{route, ChatBackend};
use clash_common::time::Timings;
use clash_common::{Battle, DetailedPrompt, Session, SimplePrompt, SystemKey, SystemMetadata, User};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Gateway build identity stamped into every battle record.
pub fn gateway_version() -> String {
    format!("{}+{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
}

/// Inputs for one battle generation.
pub struct BattleRequest {
    pub prompt: Option<SimplePrompt>,
    pub prompt_detailed: Option<DetailedPrompt>,
    pub user: Option<User>,
    pub session: Option<Session>,
    pub battle_uuid: Uuid,
    pub prompt_prebaked: bool,
}

/// A generated battle plus the audio bytes awaiting upload.
pub struct GeneratedBattle {
    pub battle: Battle,
    pub a_audio: Vec<u8>,
    pub b_audio: Vec<u8>,
}

pub struct BattleGenerator {
    catalog: Arc<BTreeMap<SystemKey, SystemMetadata>>,
    sampler: PairSampler,
    worker: WorkerClient,
    chat: Arc<dyn ChatBackend>,
}

impl BattleGenerator {
    pub fn new(
        catalog: Arc<BTreeMap<SystemKey, SystemMetadata>>,
        weights: Option<Vec<((SystemKey, SystemKey), f64)>>,
        worker: WorkerClient,
        chat: Arc<dyn ChatBackend>,
    ) -> clash_common::Result<Self> {
        let sampler = PairSampler::new(Arc::clone(&catalog), weights)?;
        Ok(Self {
            catalog,
            sampler,
            worker,
            chat,
        })
    }

    /// Active catalog keys, in stable order.
    pub fn systems(&self) -> Vec<SystemKey> {
        self.catalog.keys().cloned().collect()
    }

    /// Run one battle. Appends to `timings`; the caller owns sorting and
    /// attaching the final log to the persisted record.
    pub async fn generate_battle(
        &self,
        request: BattleRequest,
        timings: &mut Timings,
    ) -> Result<GeneratedBattle, GatewayError> {
        let BattleRequest {
            prompt,
            prompt_detailed,
            user,
            session,
            battle_uuid,
            prompt_prebaked,
        } = request;

        if prompt.is_none() && prompt_detailed.is_none() {
            return Err(GatewayError::InvalidRequest(
                "either prompt or prompt_detailed is required".to_string(),
            ));
        }

        // Detailed prompts short-circuit routing entirely: a chat outage
        // cannot break prebaked or detailed flows.
        let (prompt_detailed, prompt_routed) = match prompt_detailed {
            Some(detailed) => (detailed, false),
            None => {
                let simple = prompt.as_ref().ok_or_else(|| {
                    GatewayError::InvalidRequest("prompt is required".to_string())
                })?;
                let detailed = route(self.chat.as_ref(), simple, None).await?;
                tracing::info!(battle = %battle_uuid, ?detailed, "prompt routed");
                (detailed, true)
            }
        };

        timings.mark("sample_pair");
        let (a_system, b_system) = self.sample(&prompt_detailed)?;
        tracing::info!(battle = %battle_uuid, a = %a_system, b = %b_system, "sampled pair");

        timings.mark("generate_parallel_start");
        let (a_result, b_result) = tokio::join!(
            self.generate_one(&a_system, &prompt_detailed),
            self.generate_one(&b_system, &prompt_detailed),
        );
        let (a_timings, a_result) = a_result;
        let (b_timings, b_result) = b_result;
        timings.extend(a_timings);
        timings.extend(b_timings);
        timings.mark("generate_parallel_end");

        let (a_audio, a_metadata) = a_result?;
        let (b_audio, b_metadata) = b_result?;

        timings.mark("create_battle_obj");
        let battle = Battle {
            uuid: battle_uuid,
            gateway_version: Some(gateway_version()),
            prompt,
            prompt_detailed: Some(prompt_detailed),
            prompt_user: user,
            prompt_session: session,
            prompt_prebaked,
            prompt_routed,
            a_audio_url: None,
            a_metadata: Some(a_metadata),
            b_audio_url: None,
            b_metadata: Some(b_metadata),
            vote: None,
            vote_user: None,
            vote_session: None,
            timings: Timings::new(),
        };
        tracing::info!(battle = %battle.uuid, "battle assembled");

        Ok(GeneratedBattle {
            battle,
            a_audio,
            b_audio,
        })
    }

    // Sampling is synchronous: the thread-local RNG must not live across
    // an await point.
    fn sample(&self, prompt: &DetailedPrompt) -> Result<(SystemKey, SystemKey), GatewayError> {
        let mut rng = rand::thread_rng();
        self.sampler
            .sample_pair(prompt, &mut rng)
            .map_err(|_| GatewayError::NoEligiblePair)
    }

    // Each slot keeps its own timing log so the parallel section can merge
    // them afterwards regardless of completion order.
    async fn generate_one(
        &self,
        system: &SystemKey,
        prompt: &DetailedPrompt,
    ) -> (
        Timings,
        Result<(Vec<u8>, clash_common::ResponseMetadata), GatewayError>,
    ) {
        let mut timings = Timings::new();
        let result = self
            .worker
            .generate(system, prompt, &mut timings)
            .await
            .map_err(GatewayError::from);
        (timings, result)
    }
}
