//! clash-gateway library interface for testing
//!
//! Exposes the gateway's components so integration tests can assemble a
//! full service against mock workers, scripted chat backends, and
//! temporary-directory buckets.

pub mod api;
pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod probe;
pub mod sampler;
pub mod state;
pub mod worker;

pub use crate::error::{GatewayError, Result};
pub use crate::state::AppState;
