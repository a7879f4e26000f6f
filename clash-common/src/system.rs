//! Generation system identity and catalog metadata

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identity of one generator variant: `(system_tag, variant_tag)`.
///
/// Serialized as an object on JSON wire surfaces and as `tag:variant` in
/// CLI configuration, which is why the tags may not contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "SystemKeyRaw")]
pub struct SystemKey {
    pub system_tag: String,
    pub variant_tag: String,
}

impl SystemKey {
    pub fn new(system_tag: impl Into<String>, variant_tag: impl Into<String>) -> Result<Self> {
        let system_tag = system_tag.into();
        let variant_tag = variant_tag.into();
        if system_tag.contains(':') {
            return Err(Error::InvalidInput("system tag cannot contain ':'".into()));
        }
        if variant_tag.contains(':') {
            return Err(Error::InvalidInput("variant tag cannot contain ':'".into()));
        }
        Ok(Self {
            system_tag,
            variant_tag,
        })
    }
}

impl fmt::Display for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system_tag, self.variant_tag)
    }
}

impl FromStr for SystemKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(system), Some(variant), None) if !system.is_empty() && !variant.is_empty() => {
                SystemKey::new(system, variant)
            }
            _ => Err(Error::InvalidInput(format!(
                "invalid system key '{}', expected 'tag:variant'",
                s
            ))),
        }
    }
}

#[derive(Deserialize)]
struct SystemKeyRaw {
    system_tag: String,
    variant_tag: String,
}

impl TryFrom<SystemKeyRaw> for SystemKey {
    type Error = Error;

    fn try_from(raw: SystemKeyRaw) -> Result<Self> {
        SystemKey::new(raw.system_tag, raw.variant_tag)
    }
}

/// Whether a system's weights are publicly available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemAccess {
    Open,
    Proprietary,
}

/// Catalog entry for one generator variant, loaded once from the registry
/// file at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub key: SystemKey,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub organization: String,
    pub access: SystemAccess,
    pub supports_lyrics: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub release_audio_publicly: bool,
    /// Worker port for this variant; appended to the gateway's base URL.
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_true() -> bool {
    true
}

impl SystemMetadata {
    /// Preferred outbound link: home page, then paper, then code.
    pub fn primary_link(&self) -> Option<&str> {
        for link_type in ["home", "paper", "code"] {
            if let Some(url) = self.links.get(link_type) {
                return Some(url);
            }
        }
        self.links.values().next().map(|s| s.as_str())
    }
}
