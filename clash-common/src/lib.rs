//! # SoundClash Common Library
//!
//! Shared code for the SoundClash battle platform:
//! - Battle data model (prompts, sessions, users, votes, battles)
//! - System registry loading (SystemKey / SystemMetadata)
//! - Canonical-JSON checksums used for content addressing
//! - Chat-backed prompt pipeline (moderation, routing, lyrics)
//! - Timing logs and wall-clock helpers

pub mod battle;
pub mod chat;
pub mod checksum;
pub mod error;
pub mod prompt;
pub mod registry;
pub mod salt;
pub mod system;
pub mod time;

pub use battle::{
    Battle, ListenEvent, ListenEventKind, Preference, ResponseMetadata, Session, Slot, User,
    UserWire, Vote,
};
pub use error::{Error, Result};
pub use prompt::{DetailedPrompt, SimplePrompt};
pub use system::{SystemAccess, SystemKey, SystemMetadata};
