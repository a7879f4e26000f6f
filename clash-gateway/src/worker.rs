//! Worker HTTP client
//!
//! One generator worker is an opaque service exposing `GET /health` and
//! `POST /generate`. The client health-checks once, then POSTs the
//! detailed prompt with bounded retries (full re-POST of an identical
//! body; the health check is not repeated). Either every attempt fails and
//! a value-bearing error is returned, or the decoded audio plus a complete
//! `ResponseMetadata` comes back. No partial responses.

use crate::error::GatewayError;
use crate::probe::AudioProbe;
use base64::Engine;
use clash_common::checksum::md5_hex;
use clash_common::time::{unix_now, Timings};
use clash_common::{DetailedPrompt, ResponseMetadata, SystemKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("clash-gateway/", env!("CARGO_PKG_VERSION"));
// Generation runs for minutes; health answers in milliseconds.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of extra generate attempts after the first.
pub const DEFAULT_NUM_RETRIES: u32 = 1;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("system {system} health check failed: {reason}")]
    Unavailable { system: SystemKey, reason: String },

    #[error("system {system} generation failed after {attempts} attempts: {last_error}")]
    Failed {
        system: SystemKey,
        attempts: u32,
        last_error: String,
    },
}

impl From<WorkerError> for GatewayError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Unavailable { system, reason } => {
                GatewayError::WorkerUnavailable { system, reason }
            }
            WorkerError::Failed {
                system,
                attempts,
                last_error,
            } => GatewayError::WorkerFailed {
                system,
                attempts,
                last_error,
            },
        }
    }
}

/// Successful `/generate` payload. Only `audio_b64` is mandatory; the
/// remaining fields enrich `ResponseMetadata` when present.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    audio_b64: Option<String>,
    #[serde(default)]
    git_hash: Option<String>,
    #[serde(default)]
    time_queued: Option<f64>,
    #[serde(default)]
    time_started: Option<f64>,
    #[serde(default)]
    time_completed: Option<f64>,
    #[serde(default)]
    lyrics: Option<String>,
}

/// HTTP client for the whole worker fleet.
pub struct WorkerClient {
    generate_http: reqwest::Client,
    health_http: reqwest::Client,
    base_url: String,
    ports: HashMap<SystemKey, u16>,
    num_retries: u32,
    probe: Arc<dyn AudioProbe>,
}

impl WorkerClient {
    pub fn new(
        base_url: impl Into<String>,
        ports: HashMap<SystemKey, u16>,
        num_retries: u32,
        probe: Arc<dyn AudioProbe>,
    ) -> clash_common::Result<Self> {
        let generate_http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|e| clash_common::Error::Config(format!("worker HTTP client: {}", e)))?;
        let health_http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| clash_common::Error::Config(format!("worker HTTP client: {}", e)))?;
        Ok(Self {
            generate_http,
            health_http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ports,
            num_retries,
            probe,
        })
    }

    /// Base URL for one worker: gateway base plus the system's port.
    pub fn system_url(&self, system: &SystemKey) -> Result<String, WorkerError> {
        let port = self.ports.get(system).ok_or_else(|| WorkerError::Unavailable {
            system: system.clone(),
            reason: "no port configured".to_string(),
        })?;
        Ok(format!("{}:{}", self.base_url, port))
    }

    /// Generate one clip. Appends `health_check_*` and `generate_*` labels
    /// to `timings` in order.
    pub async fn generate(
        &self,
        system: &SystemKey,
        prompt: &DetailedPrompt,
        timings: &mut Timings,
    ) -> Result<(Vec<u8>, ResponseMetadata), WorkerError> {
        let url = self.system_url(system)?;

        timings.mark(format!("health_check_{}_start", system));
        self.check_health(system, &url).await?;
        timings.mark(format!("health_check_{}_end", system));

        timings.mark(format!("generate_{}_start", system));
        let started = unix_now();
        let mut last_error = String::new();

        for attempt in 0..=self.num_retries {
            match self.attempt_generate(system, &url, prompt, started, attempt).await {
                Ok((audio, metadata)) => {
                    timings.mark(format!("generate_{}_end", system));
                    return Ok((audio, metadata));
                }
                Err(reason) => {
                    if attempt < self.num_retries {
                        tracing::warn!(
                            system = %system,
                            attempt,
                            error = %reason,
                            "worker generate attempt failed, retrying"
                        );
                    }
                    last_error = reason;
                }
            }
        }

        timings.mark(format!("generate_{}_failed", system));
        Err(WorkerError::Failed {
            system: system.clone(),
            attempts: 1 + self.num_retries,
            last_error,
        })
    }

    async fn check_health(&self, system: &SystemKey, url: &str) -> Result<(), WorkerError> {
        let response = self
            .health_http
            .get(format!("{}/health", url))
            .send()
            .await
            .map_err(|e| WorkerError::Unavailable {
                system: system.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Unavailable {
                system: system.clone(),
                reason: format!("status {}: {}", status, body),
            });
        }
        Ok(())
    }

    // One full POST + decode + probe. Any failure fails the attempt.
    async fn attempt_generate(
        &self,
        system: &SystemKey,
        url: &str,
        prompt: &DetailedPrompt,
        started: f64,
        attempt: u32,
    ) -> Result<(Vec<u8>, ResponseMetadata), String> {
        let response = self
            .generate_http
            .post(format!("{}/generate", url))
            .json(prompt)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("status {}: {}", status, body));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed response: {}", e))?;
        let completed = unix_now();

        let audio_b64 = payload
            .audio_b64
            .ok_or_else(|| "response did not include audio_b64".to_string())?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(audio_b64.as_bytes())
            .map_err(|e| format!("audio_b64 decode: {}", e))?;

        let info = self
            .probe
            .probe(&audio)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(
            system = %system,
            size_bytes = audio.len(),
            sample_rate = ?info.sample_rate,
            num_channels = ?info.num_channels,
            duration = ?info.duration,
            attempt,
            "worker generate succeeded"
        );

        let metadata = ResponseMetadata {
            system_key: Some(system.clone()),
            system_git_hash: payload.git_hash,
            system_time_queued: payload.time_queued,
            system_time_started: payload.time_started,
            system_time_completed: payload.time_completed,
            gateway_time_started: Some(started),
            gateway_time_completed: Some(completed),
            gateway_num_retries: Some(attempt),
            size_bytes: Some(audio.len() as u64),
            lyrics: payload.lyrics,
            sample_rate: info.sample_rate,
            num_channels: info.num_channels,
            duration: info.duration,
            checksum: Some(md5_hex(&audio)),
        };

        Ok((audio, metadata))
    }
}
