//! Usage-based decay of concept priority.
//!
//! A pass subtracts a fixed rate from every concept's stored `decay_factor`
//! (floored at 0) in one SQL statement; retrieval proportionally boosts the
//! concepts it returns. Neither path touches `confidence`.

use serde::Serialize;
use std::sync::Arc;

use super::stats::DecayStats;
use super::store::Store;
use crate::config::DecayConfig;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct DecayPass {
    pub affected: usize,
    pub rate: f64,
}

/// The multiplier ranking applies for a stored factor: the factor itself, or
/// 1.0 when decay is disabled.
pub fn effective_factor(stored: f64, decay_enabled: bool) -> f64 {
    if decay_enabled {
        stored
    } else {
        1.0
    }
}

pub struct DecayEngine {
    store: Arc<Store>,
    config: DecayConfig,
}

impl DecayEngine {
    pub fn new(store: Arc<Store>, config: DecayConfig) -> Self {
        Self { store, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Run one decay pass over every concept, regardless of `enabled`.
    ///
    /// Periodic passes are gated by the caller; this entry point also backs
    /// the forced pass from the CLI.
    pub fn run_pass(&self) -> Result<DecayPass> {
        let grace = chrono::Duration::seconds(self.config.grace_window_seconds);
        let affected = self.store.decay_all(self.config.rate, grace)?;
        tracing::info!(affected, rate = self.config.rate, "decay pass complete");
        Ok(DecayPass {
            affected,
            rate: self.config.rate,
        })
    }

    /// Boost each `(id, activation)` by `rejuvenation_max_boost * activation`.
    ///
    /// Activation is clamped to `[0, 1]` first, so a weakly related concept
    /// gains less than a strong match. No-op when decay is disabled.
    pub fn rejuvenate(&self, activations: &[(String, f64)]) -> Result<usize> {
        if !self.config.enabled || activations.is_empty() {
            return Ok(0);
        }
        let boosts: Vec<(String, f64)> = activations
            .iter()
            .map(|(id, a)| {
                let a = if a.is_nan() { 0.0 } else { a.clamp(0.0, 1.0) };
                (id.clone(), self.config.rejuvenation_max_boost * a)
            })
            .collect();
        let updated = self.store.rejuvenate(&boosts)?;
        tracing::debug!(updated, "rejuvenated recalled concepts");
        Ok(updated)
    }

    pub fn stats(&self) -> Result<DecayStats> {
        self.store.decay_stats()
    }

    pub fn reset(&self, concept_id: &str) -> Result<()> {
        self.store.reset_decay(concept_id)?;
        tracing::info!(concept_id, "decay reset");
        Ok(())
    }

    pub fn reset_all(&self) -> Result<usize> {
        let updated = self.store.reset_all_decay()?;
        tracing::info!(updated, "decay reset for all concepts");
        Ok(updated)
    }
}
