//! Gateway error types and their HTTP mapping
//!
//! Every failure a handler can produce is one of these kinds; the
//! `IntoResponse` impl is the single place where kinds become status codes.
//! Worker retries are absorbed inside the worker client; everything else
//! surfaces here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clash_common::chat::{ChatError, PromptRejection};
use clash_common::SystemKey;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error kinds, stable and enumerable.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed request fields (400). Message names the field.
    #[error("{0}")]
    InvalidRequest(String),

    /// Moderation refusal (406). Body carries the rationale.
    #[error("prompt rejected: {0}")]
    PromptRejected(PromptRejection),

    /// Reserved for an external rate limiter (429).
    #[error("rate limited")]
    RateLimited,

    /// Worker health check failed (500).
    #[error("system {system} is unavailable: {reason}")]
    WorkerUnavailable { system: SystemKey, reason: String },

    /// Worker generation exhausted its retries (500).
    #[error("system {system} generation failed after {attempts} attempts: {last_error}")]
    WorkerFailed {
        system: SystemKey,
        attempts: u32,
        last_error: String,
    },

    /// Configuration or prompt constraints left no legal pair (500).
    #[error("no eligible system pair for this prompt")]
    NoEligiblePair,

    /// Upstream chat backend failure (500).
    #[error("chat backend error: {0}")]
    Chat(String),

    /// Object store failure (500).
    #[error("storage error: {0}")]
    Storage(String),

    /// Battle uuid unknown to cache and metadata store (404).
    #[error("battle not found: {0}")]
    NotFound(String),

    /// Synthetic failure from the flakiness knob (500).
    #[error("injected failure")]
    InjectedFailure,

    /// Unclassified server-side failure (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PromptRejected(_) => StatusCode::NOT_ACCEPTABLE,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::WorkerUnavailable { .. }
            | GatewayError::WorkerFailed { .. }
            | GatewayError::NoEligiblePair
            | GatewayError::Chat(_)
            | GatewayError::Storage(_)
            | GatewayError::InjectedFailure
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable kind name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::PromptRejected(_) => "prompt_rejected",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::WorkerUnavailable { .. } => "worker_unavailable",
            GatewayError::WorkerFailed { .. } => "worker_failed",
            GatewayError::NoEligiblePair => "no_eligible_pair",
            GatewayError::Chat(_) => "chat",
            GatewayError::Storage(_) => "storage",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InjectedFailure => "injected_failure",
            GatewayError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = match &self {
            // The rationale alone is the contract with the frontend.
            GatewayError::PromptRejected(rejection) => rejection.to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

impl From<ChatError> for GatewayError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Rejected(rejection) => GatewayError::PromptRejected(rejection),
            other => GatewayError::Chat(other.to_string()),
        }
    }
}
