//! Recall orchestration.
//!
//! [`Recaller`] is the single entry point surrounding layers call. Each recall
//! runs retrieval (semantic or entity-scoped), applies the access side
//! effects, bumps the persisted recall counter and fires a decay pass when the
//! counter reaches a multiple of the configured interval.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::activation::{ActivationSource, RankedConcept, SpreadingActivation};
use super::decay::{effective_factor, DecayEngine};
use super::stats::DecayStats;
use super::store::{Store, RECALL_COUNT_KEY};
use super::types::Episode;
use crate::config::MnemoConfig;
use crate::embedding::EmbeddingProvider;
use crate::{Error, Result};

/// Episodes returned alongside concepts on the entity path.
const ENTITY_EPISODE_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallMode {
    Semantic,
    Entity,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub mode: RecallMode,
    pub concepts: Vec<RankedConcept>,
    /// Populated on the entity path only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<Episode>,
    /// Counter value after this recall.
    pub recall_count: u64,
    pub decay_triggered: bool,
    pub embedding_used: bool,
}

/// `Send + Sync`: concurrent callers share one instance behind an `Arc`, and
/// every write goes through the store's own connection lock.
pub struct Recaller {
    store: Arc<Store>,
    retrieval: SpreadingActivation,
    decay: DecayEngine,
    default_k: usize,
    recall_count: AtomicU64,
}

impl Recaller {
    /// Build an orchestrator over `store`, resuming the persisted recall counter.
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &MnemoConfig,
    ) -> Result<Self> {
        config.validate()?;
        let recall_count = store.read_counter(RECALL_COUNT_KEY)?;
        tracing::debug!(recall_count, "recall counter loaded");
        Ok(Self {
            retrieval: SpreadingActivation::new(
                Arc::clone(&store),
                embedder,
                config.retrieval.clone(),
            ),
            decay: DecayEngine::new(Arc::clone(&store), config.decay.clone()),
            default_k: config.retrieval.default_k,
            store,
            recall_count: AtomicU64::new(recall_count),
        })
    }

    /// Last counter value this instance observed.
    pub fn recall_count(&self) -> u64 {
        self.recall_count.load(Ordering::Relaxed)
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn decay_engine(&self) -> &DecayEngine {
        &self.decay
    }

    /// Recall up to `k` concepts for `query`, or for `entity` when given.
    pub fn recall(&self, query: &str, k: usize, entity: Option<&str>) -> Result<RecallResult> {
        match entity {
            Some(entity) => self.recall_entity(entity, k),
            None => self.recall_semantic(query, k),
        }
    }

    fn recall_semantic(&self, query: &str, k: usize) -> Result<RecallResult> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }

        let retrieval = self.retrieval.retrieve(query, k, self.decay.enabled())?;

        if self.decay.enabled() {
            let activations: Vec<(String, f64)> = retrieval
                .concepts
                .iter()
                .map(|r| (r.concept.id.clone(), r.activation))
                .collect();
            self.decay.rejuvenate(&activations)?;
        } else {
            let ids: Vec<String> = retrieval.concepts.iter().map(|r| r.concept.id.clone()).collect();
            self.store.record_access(&ids, true)?;
        }

        let (recall_count, decay_triggered) = self.count_and_maybe_decay()?;
        tracing::debug!(
            returned = retrieval.concepts.len(),
            recall_count,
            decay_triggered,
            "semantic recall"
        );
        Ok(RecallResult {
            mode: RecallMode::Semantic,
            concepts: retrieval.concepts,
            episodes: Vec::new(),
            recall_count,
            decay_triggered,
            embedding_used: retrieval.embedding_used,
        })
    }

    fn recall_entity(&self, entity: &str, k: usize) -> Result<RecallResult> {
        let (concepts, episodes) = match self.store.find_entity(entity)? {
            Some(found) => {
                let concepts = self.store.concepts_for_entity(&found.id, k)?;
                let episodes = self.store.episodes_for_entity(&found.id, ENTITY_EPISODE_LIMIT)?;
                (concepts, episodes)
            }
            None => {
                tracing::debug!(entity, "unknown entity");
                (Vec::new(), Vec::new())
            }
        };

        // Entity lookups are not evidence of relevance: count the access but
        // leave decay state and last_accessed alone.
        let ids: Vec<String> = concepts.iter().map(|c| c.id.clone()).collect();
        self.store.record_access(&ids, false)?;

        let apply_decay = self.decay.enabled();
        let ranked = concepts
            .into_iter()
            .map(|concept| RankedConcept {
                score: effective_factor(concept.decay_factor, apply_decay),
                activation: 1.0,
                source: ActivationSource::Keyword,
                hops: 0,
                concept,
            })
            .collect();

        let (recall_count, decay_triggered) = self.count_and_maybe_decay()?;
        Ok(RecallResult {
            mode: RecallMode::Entity,
            concepts: ranked,
            episodes,
            recall_count,
            decay_triggered,
            embedding_used: false,
        })
    }

    /// Increment the shared counter and run a pass on interval boundaries.
    fn count_and_maybe_decay(&self) -> Result<(u64, bool)> {
        let count = self.store.increment_counter(RECALL_COUNT_KEY)?;
        // Counts from concurrent recalls may land out of order; keep the highest
        self.recall_count.fetch_max(count, Ordering::Relaxed);

        let interval = self.decay.config().interval;
        let due = self.decay.enabled() && interval > 0 && count % interval == 0;
        if due {
            self.decay.run_pass()?;
        }
        Ok((count, due))
    }

    pub fn decay_stats(&self) -> Result<DecayStats> {
        self.decay.stats()
    }

    pub fn reset_decay(&self, concept_id: &str) -> Result<()> {
        self.decay.reset(concept_id)
    }
}
