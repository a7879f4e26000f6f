//! Weighted system-pair sampling
//!
//! Given the catalog and positive weights over unordered pairs, draw the
//! two opponents for a battle. Instrumental prompts may include at most
//! one lyric-capable system (so at most one side wastes its lyric
//! ability); vocal prompts require both sides to support lyrics. The
//! drawn pair is shuffled into slots A and B.

use clash_common::{DetailedPrompt, SystemKey, SystemMetadata};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// No pair satisfies the current prompt's lyric constraints.
#[derive(Debug, Error)]
#[error("no eligible system pair")]
pub struct NoEligiblePair;

#[derive(Debug)]
pub struct PairSampler {
    catalog: Arc<BTreeMap<SystemKey, SystemMetadata>>,
    weights: Vec<((SystemKey, SystemKey), f64)>,
}

impl PairSampler {
    /// Validate and normalize the pair weights.
    ///
    /// `None` weights mean every unordered combination at equal weight.
    /// Configuration errors (too few systems, non-positive weight, unknown
    /// system, self-pair) are rejected here, at load time.
    pub fn new(
        catalog: Arc<BTreeMap<SystemKey, SystemMetadata>>,
        weights: Option<Vec<((SystemKey, SystemKey), f64)>>,
    ) -> clash_common::Result<Self> {
        use clash_common::Error;

        if catalog.len() < 2 {
            return Err(Error::Config(
                "at least two systems are required".to_string(),
            ));
        }

        let weights = match weights {
            Some(weights) => weights,
            None => {
                let keys: Vec<&SystemKey> = catalog.keys().collect();
                let mut combos = Vec::new();
                for i in 0..keys.len() {
                    for j in (i + 1)..keys.len() {
                        combos.push(((keys[i].clone(), keys[j].clone()), 1.0));
                    }
                }
                combos
            }
        };

        if weights.is_empty() {
            return Err(Error::Config("no pair weights specified".to_string()));
        }
        for ((a, b), weight) in &weights {
            if *weight <= 0.0 {
                return Err(Error::Config(format!(
                    "weight for pair {}/{} must be positive, got {}",
                    a, b, weight
                )));
            }
            if !catalog.contains_key(a) {
                return Err(Error::Config(format!("system {} not found", a)));
            }
            if !catalog.contains_key(b) {
                return Err(Error::Config(format!("system {} not found", b)));
            }
            if a == b {
                return Err(Error::Config(format!("system {} cannot battle itself", a)));
            }
        }

        let norm: f64 = weights.iter().map(|(_, w)| w).sum();
        let weights = weights
            .into_iter()
            .map(|(pair, w)| (pair, w / norm))
            .collect();

        Ok(Self { catalog, weights })
    }

    fn supports_lyrics(&self, key: &SystemKey) -> bool {
        self.catalog
            .get(key)
            .map(|meta| meta.supports_lyrics)
            .unwrap_or(false)
    }

    fn pair_eligible(&self, pair: &(SystemKey, SystemKey), prompt: &DetailedPrompt) -> bool {
        let lyric_count = usize::from(self.supports_lyrics(&pair.0))
            + usize::from(self.supports_lyrics(&pair.1));
        if prompt.instrumental {
            lyric_count <= 1
        } else {
            lyric_count == 2
        }
    }

    /// Draw an ordered `(A, B)` pair for this prompt.
    pub fn sample_pair(
        &self,
        prompt: &DetailedPrompt,
        rng: &mut impl Rng,
    ) -> Result<(SystemKey, SystemKey), NoEligiblePair> {
        let eligible: Vec<&((SystemKey, SystemKey), f64)> = self
            .weights
            .iter()
            .filter(|(pair, _)| self.pair_eligible(pair, prompt))
            .collect();

        if eligible.is_empty() {
            return Err(NoEligiblePair);
        }

        let distribution = WeightedIndex::new(eligible.iter().map(|(_, w)| *w))
            .map_err(|_| NoEligiblePair)?;
        let (pair, _) = eligible[distribution.sample(rng)];

        if rng.gen::<bool>() {
            Ok((pair.1.clone(), pair.0.clone()))
        } else {
            Ok(pair.clone())
        }
    }
}
