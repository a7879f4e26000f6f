//! System registry loading
//!
//! The catalog of available generation systems lives in a TOML file:
//!
//! ```toml
//! [systems.musicgen]
//! display_name = "MusicGen"
//! organization = "Meta"
//! access = "OPEN"
//! supports_lyrics = false
//! description = "Autoregressive transformer over EnCodec tokens."
//!
//! [systems.musicgen.links]
//! paper = "https://arxiv.org/abs/2306.05284"
//!
//! [systems.musicgen.variants.small]
//! description = "300M checkpoint."
//! port = 9101
//! ```
//!
//! Each `(system, variant)` pair becomes one catalog entry; variant fields
//! override system-level ones and the two descriptions are concatenated.
//! The registry is parsed once at startup and shared immutably.

use crate::error::{Error, Result};
use crate::system::{SystemAccess, SystemKey, SystemMetadata};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    systems: BTreeMap<String, SystemEntry>,
}

#[derive(Debug, Deserialize)]
struct SystemEntry {
    display_name: String,
    #[serde(default)]
    description: String,
    organization: String,
    access: SystemAccess,
    supports_lyrics: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    citation: Option<String>,
    #[serde(default)]
    links: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    release_audio_publicly: bool,
    #[serde(default)]
    variants: BTreeMap<String, VariantEntry>,
}

#[derive(Debug, Deserialize)]
struct VariantEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    supports_lyrics: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Parse a registry file into the catalog map.
pub fn load_registry(path: &Path) -> Result<BTreeMap<SystemKey, SystemMetadata>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read registry {}: {}", path.display(), e))
    })?;
    parse_registry(&content)
}

/// Parse registry TOML content into the catalog map.
pub fn parse_registry(content: &str) -> Result<BTreeMap<SystemKey, SystemMetadata>> {
    let file: RegistryFile = toml::from_str(content)
        .map_err(|e| Error::Config(format!("invalid registry TOML: {}", e)))?;

    let mut catalog = BTreeMap::new();
    for (system_tag, entry) in file.systems {
        if entry.variants.is_empty() {
            return Err(Error::Config(format!(
                "system '{}' must declare at least one variant",
                system_tag
            )));
        }
        for (variant_tag, variant) in &entry.variants {
            let key = SystemKey::new(system_tag.clone(), variant_tag.clone())?;
            let description = [entry.description.as_str(), variant.description.as_str()]
                .iter()
                .filter(|d| !d.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            let metadata = SystemMetadata {
                key: key.clone(),
                display_name: entry.display_name.clone(),
                description,
                organization: entry.organization.clone(),
                access: entry.access,
                supports_lyrics: variant.supports_lyrics.unwrap_or(entry.supports_lyrics),
                private: entry.private,
                model_type: entry.model_type.clone(),
                citation: entry.citation.clone(),
                links: entry.links.clone(),
                release_audio_publicly: entry.release_audio_publicly,
                port: variant.port,
            };
            if catalog.insert(key.clone(), metadata).is_some() {
                return Err(Error::Config(format!("duplicate system key '{}'", key)));
            }
        }
    }
    Ok(catalog)
}
