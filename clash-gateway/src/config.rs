//! Gateway configuration
//!
//! CLI specs follow the deploy tooling's compact forms:
//! - systems: `tag:variant[:port]` entries, comma separated
//! - weights: `a_tag:a_variant/b_tag:b_variant/weight` entries, comma
//!   separated (absent means all combinations, equal weight)
//!
//! Ports resolve CLI-first, then the registry; a system with no port from
//! either source is a configuration error caught at startup.

use clash_common::{Error, Result, SystemKey, SystemMetadata};
use std::collections::{BTreeMap, HashMap};

/// Parse a comma-separated systems spec into keys and port overrides.
pub fn parse_systems_spec(spec: &str) -> Result<(Vec<SystemKey>, HashMap<SystemKey, u16>)> {
    let mut systems = Vec::new();
    let mut ports = HashMap::new();

    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.split(':').collect();
        match parts.as_slice() {
            [system, variant] => {
                systems.push(SystemKey::new(*system, *variant)?);
            }
            [system, variant, port] => {
                let key = SystemKey::new(*system, *variant)?;
                let port = port.parse::<u16>().map_err(|_| {
                    Error::Config(format!("invalid port in system entry '{}'", entry))
                })?;
                ports.insert(key.clone(), port);
                systems.push(key);
            }
            _ => {
                return Err(Error::Config(format!(
                    "invalid system entry '{}', expected tag:variant[:port]",
                    entry
                )));
            }
        }
    }

    if systems.is_empty() {
        return Err(Error::Config("no systems specified".to_string()));
    }
    Ok((systems, ports))
}

/// Parse a comma-separated weights spec.
pub fn parse_weights_spec(spec: &str) -> Result<Vec<((SystemKey, SystemKey), f64)>> {
    let mut weights = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.split('/').collect();
        let [a, b, weight] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "invalid weight entry '{}', expected a:b/c:d/weight",
                entry
            )));
        };
        let a: SystemKey = a.parse()?;
        let b: SystemKey = b.parse()?;
        let weight = weight
            .parse::<f64>()
            .map_err(|_| Error::Config(format!("invalid weight in entry '{}'", entry)))?;
        weights.push(((a, b), weight));
    }

    if weights.is_empty() {
        return Err(Error::Config("no weights specified".to_string()));
    }
    Ok(weights)
}

/// Restrict the registry catalog to the configured systems and resolve a
/// complete port map (CLI overrides win over registry ports).
pub fn resolve_catalog(
    registry: &BTreeMap<SystemKey, SystemMetadata>,
    systems: &[SystemKey],
    port_overrides: &HashMap<SystemKey, u16>,
) -> Result<(BTreeMap<SystemKey, SystemMetadata>, HashMap<SystemKey, u16>)> {
    let mut catalog = BTreeMap::new();
    let mut ports = HashMap::new();

    for key in systems {
        let metadata = registry
            .get(key)
            .ok_or_else(|| Error::Config(format!("system {} not found in registry", key)))?;
        let port = port_overrides
            .get(key)
            .copied()
            .or(metadata.port)
            .ok_or_else(|| {
                Error::Config(format!(
                    "system {} has no port (set it in the registry or the systems spec)",
                    key
                ))
            })?;
        catalog.insert(key.clone(), metadata.clone());
        ports.insert(key.clone(), port);
    }

    Ok((catalog, ports))
}
