//! Spreading-activation retrieval.
//!
//! Pipeline: embed query → seed by cosine similarity (keyword overlap when no
//! vector is available) → spread over typed relations for a fixed number of
//! rounds → weight by stored decay factor → rank.
//!
//! Spreading uses max-relaxation over a snapshot of the previous round, so a
//! concept reachable along several paths takes its strongest path once and the
//! result does not depend on edge or insertion order. Adjacency for a whole
//! round is fetched in one batched query.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::decay::effective_factor;
use super::store::Store;
use super::types::Concept;
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::Result;

/// Keyword candidates fetched from the FTS index per seed slot, before overlap
/// scoring trims them back down.
const KEYWORD_CANDIDATE_MULTIPLIER: usize = 5;

/// How a concept entered the activation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    Embedding,
    Keyword,
    Spread,
}

/// A retrieved concept with its score and provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RankedConcept {
    pub concept: Concept,
    /// `activation * decay_factor`.
    pub score: f64,
    pub activation: f64,
    pub source: ActivationSource,
    /// Spreading round in which the concept was first activated; 0 for seeds.
    pub hops: usize,
}

/// Output of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub concepts: Vec<RankedConcept>,
    /// `false` when the provider failed and seeding fell back to keywords.
    pub embedding_used: bool,
}

#[derive(Debug, Clone, Copy)]
struct Activation {
    value: f64,
    source: ActivationSource,
    hops: usize,
}

pub struct SpreadingActivation {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl SpreadingActivation {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve the top `k` concepts for `query`.
    ///
    /// With `apply_decay` false every concept ranks as if fully fresh.
    /// Retrieval never writes; rejuvenation is the caller's decision.
    pub fn retrieve(&self, query: &str, k: usize, apply_decay: bool) -> Result<Retrieval> {
        if k == 0 {
            return Ok(Retrieval {
                concepts: Vec::new(),
                embedding_used: false,
            });
        }
        let overfetch_k = k.saturating_mul(self.config.overfetch_factor.max(1));

        let query_embedding = match self.embedder.embed(query) {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                tracing::warn!(model = self.embedder.model_name(), "empty query embedding, using keyword overlap");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable, using keyword overlap");
                None
            }
        };
        let embedding_used = query_embedding.is_some();

        let (mut concepts, mut activation) = self.seed(query, query_embedding.as_deref(), overfetch_k)?;
        let seed_count = activation.len();

        self.spread(&mut concepts, &mut activation)?;

        let mut ranked: Vec<RankedConcept> = activation
            .into_iter()
            .filter_map(|(id, a)| {
                let concept = concepts.remove(&id)?;
                Some(RankedConcept {
                    score: a.value * effective_factor(concept.decay_factor, apply_decay),
                    activation: a.value,
                    source: a.source,
                    hops: a.hops,
                    concept,
                })
            })
            .collect();
        ranked.sort_by(rank_order);
        ranked.truncate(k);

        tracing::debug!(
            seeds = seed_count,
            returned = ranked.len(),
            embedding_used,
            "retrieval complete"
        );
        Ok(Retrieval {
            concepts: ranked,
            embedding_used,
        })
    }

    /// Initial activation: similarity (or keyword overlap) for the best
    /// `overfetch_k` concepts with a positive score.
    fn seed(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        overfetch_k: usize,
    ) -> Result<(HashMap<String, Concept>, HashMap<String, Activation>)> {
        let mut scored: HashMap<String, (Concept, Activation)> = HashMap::new();
        let query_tokens = tokenize(query);

        if let Some(embedding) = query_embedding {
            for (concept, similarity) in self.store.find_similar(embedding, overfetch_k)? {
                if similarity > 0.0 {
                    let seed = Activation {
                        value: similarity,
                        source: ActivationSource::Embedding,
                        hops: 0,
                    };
                    scored.insert(concept.id.clone(), (concept, seed));
                }
            }
            // Concepts without a vector can only be reached by keywords
            self.keyword_seed(&query_tokens, overfetch_k, true, &mut scored)?;
        }

        if scored.is_empty() {
            self.keyword_seed(&query_tokens, overfetch_k, false, &mut scored)?;
        }

        let mut seeds: Vec<(Concept, Activation)> = scored.into_values().collect();
        seeds.sort_by(|(ca, aa), (cb, ab)| {
            ab.value
                .total_cmp(&aa.value)
                .then_with(|| ca.id.cmp(&cb.id))
        });
        seeds.truncate(overfetch_k);

        let mut concepts = HashMap::with_capacity(seeds.len());
        let mut activation = HashMap::with_capacity(seeds.len());
        for (concept, seed) in seeds {
            activation.insert(concept.id.clone(), seed);
            concepts.insert(concept.id.clone(), concept);
        }
        Ok((concepts, activation))
    }

    fn keyword_seed(
        &self,
        query_tokens: &BTreeSet<String>,
        overfetch_k: usize,
        only_without_embedding: bool,
        scored: &mut HashMap<String, (Concept, Activation)>,
    ) -> Result<()> {
        if query_tokens.is_empty() {
            return Ok(());
        }
        let terms: Vec<String> = query_tokens.iter().cloned().collect();
        let limit = overfetch_k.saturating_mul(KEYWORD_CANDIDATE_MULTIPLIER);
        for concept in self.store.keyword_candidates(&terms, limit, only_without_embedding)? {
            let overlap = keyword_overlap(query_tokens, &concept.keyword_text());
            if overlap <= 0.0 {
                continue;
            }
            let seed = Activation {
                value: overlap,
                source: ActivationSource::Keyword,
                hops: 0,
            };
            match scored.get_mut(&concept.id) {
                Some((_, existing)) if existing.value >= overlap => {}
                Some((_, existing)) => *existing = seed,
                None => {
                    scored.insert(concept.id.clone(), (concept, seed));
                }
            }
        }
        Ok(())
    }

    /// Propagate activation along outgoing relations for `spread_hops` rounds.
    fn spread(
        &self,
        concepts: &mut HashMap<String, Concept>,
        activation: &mut HashMap<String, Activation>,
    ) -> Result<()> {
        let threshold = self.config.activation_threshold;
        let hop_decay = self.config.hop_decay;

        // Only concepts whose activation changed last round can push anything new
        let mut frontier: Vec<String> = activation.keys().cloned().collect();

        for round in 1..=self.config.spread_hops {
            let snapshot = activation.clone();
            let mut sources: Vec<String> = frontier
                .drain(..)
                .filter(|id| snapshot.get(id).is_some_and(|a| a.value > threshold))
                .collect();
            if sources.is_empty() {
                break;
            }
            sources.sort();

            let adjacency = self.store.relations_from(&sources)?;
            let mut changed: BTreeSet<String> = BTreeSet::new();
            for source_id in &sources {
                let Some(edges) = adjacency.get(source_id) else {
                    continue;
                };
                let source_value = snapshot[source_id].value;
                for edge in edges {
                    let propagated = source_value * edge.strength * hop_decay;
                    if propagated <= 0.0 {
                        continue;
                    }
                    match activation.get_mut(&edge.target_id) {
                        Some(existing) if existing.value >= propagated => {}
                        Some(existing) => {
                            existing.value = propagated;
                            changed.insert(edge.target_id.clone());
                        }
                        None => {
                            activation.insert(
                                edge.target_id.clone(),
                                Activation {
                                    value: propagated,
                                    source: ActivationSource::Spread,
                                    hops: round,
                                },
                            );
                            changed.insert(edge.target_id.clone());
                        }
                    }
                }
            }

            let unseen: Vec<String> = changed
                .iter()
                .filter(|id| !concepts.contains_key(*id))
                .cloned()
                .collect();
            if !unseen.is_empty() {
                let hydrated = self.store.concepts_by_ids(&unseen)?;
                for id in &unseen {
                    if !hydrated.contains_key(id) {
                        tracing::debug!(target_id = %id, "skipping relation to missing concept");
                        activation.remove(id);
                        changed.remove(id);
                    }
                }
                concepts.extend(hydrated);
            }

            tracing::debug!(round, sources = sources.len(), changed = changed.len(), "spread round");
            frontier = changed.into_iter().collect();
        }
        Ok(())
    }
}

/// Final score desc, then confidence desc, then id asc.
fn rank_order(a: &RankedConcept, b: &RankedConcept) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.concept.confidence.total_cmp(&a.concept.confidence))
        .then_with(|| a.concept.id.cmp(&b.concept.id))
}

/// Lowercased alphanumeric runs of at least two characters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query tokens present in `text`.
pub fn keyword_overlap(query_tokens: &BTreeSet<String>, text: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let concept_tokens = tokenize(text);
    let shared = query_tokens.intersection(&concept_tokens).count();
    shared as f64 / query_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Relation, RelationType};
    use crate::Error;

    const DIM: usize = 8;

    fn unit(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[dim] = 1.0;
        v
    }

    /// Returns the same vector for every query.
    struct FixedEmbedder(Vec<f32>);

    impl EmbeddingProvider for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct DownEmbedder;

    impl EmbeddingProvider for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::EmbeddingUnavailable("offline".into()))
        }
        fn model_name(&self) -> &str {
            "down"
        }
    }

    /// 0.9 along e0, the rest along e1: cosine 0.9 with `unit(0)`.
    fn query_vector() -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[0] = 0.9;
        v[1] = (1.0f32 - 0.81).sqrt();
        v
    }

    fn engine(store: &Arc<Store>, embedder: impl EmbeddingProvider + 'static) -> SpreadingActivation {
        SpreadingActivation::new(Arc::clone(store), Arc::new(embedder), RetrievalConfig::default())
    }

    fn find<'a>(ranked: &'a [RankedConcept], id: &str) -> Option<&'a RankedConcept> {
        ranked.iter().find(|r| r.concept.id == id)
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("The DB is a-OK, x y 42!");
        let expected: BTreeSet<String> = ["the", "db", "is", "ok", "42"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_keyword_overlap_fraction() {
        let q = tokenize("deploy friday rollback");
        assert!((keyword_overlap(&q, "Friday deploy freeze") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(keyword_overlap(&q, "nothing shared"), 0.0);
        assert_eq!(keyword_overlap(&BTreeSet::new(), "anything"), 0.0);
    }

    #[test]
    fn test_empty_graph_returns_empty() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(&store, FixedEmbedder(unit(0)));
        let out = engine.retrieve("anything", 5, true).unwrap();
        assert!(out.concepts.is_empty());
        assert!(out.embedding_used);
    }

    #[test]
    fn test_one_hop_spread_scenario() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(
                &Concept::with_id("c1", "seed")
                    .embedding(unit(0))
                    .relation(Relation::new(RelationType::Implies, "target", 0.8)),
            )
            .unwrap();
        store
            .upsert_concept(&Concept::with_id("target", "target").embedding(unit(3)).decay_factor(0.7))
            .unwrap();
        for (i, dim) in [4, 5, 6].into_iter().enumerate() {
            store
                .upsert_concept(&Concept::with_id(format!("other{i}"), "other").embedding(unit(dim)))
                .unwrap();
        }

        let out = engine(&store, FixedEmbedder(query_vector())).retrieve("q", 5, true).unwrap();
        let seed = find(&out.concepts, "c1").unwrap();
        assert_eq!(seed.source, ActivationSource::Embedding);
        assert_eq!(seed.hops, 0);
        assert!((seed.activation - 0.9).abs() < 1e-5);

        let target = find(&out.concepts, "target").unwrap();
        assert_eq!(target.source, ActivationSource::Spread);
        assert_eq!(target.hops, 1);
        assert!((target.activation - 0.9 * 0.8 * 0.5).abs() < 1e-5);
        assert!((target.score - 0.9 * 0.8 * 0.5 * 0.7).abs() < 1e-5);

        // orthogonal concepts never seed
        assert!(find(&out.concepts, "other0").is_none());
    }

    #[test]
    fn test_multiple_paths_take_the_strongest_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for i in 0..3 {
            store
                .upsert_concept(
                    &Concept::with_id(format!("s{i}"), "seed")
                        .embedding(unit(0))
                        .relation(Relation::new(RelationType::Causes, "hub", 0.6)),
                )
                .unwrap();
        }
        store.upsert_concept(&Concept::with_id("hub", "hub")).unwrap();

        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 10, true).unwrap();
        let hub = find(&out.concepts, "hub").unwrap();
        assert!((hub.activation - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_spread_respects_hop_limit_and_threshold() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(
                &Concept::with_id("a", "a")
                    .embedding(unit(0))
                    .relation(Relation::new(RelationType::Implies, "b", 1.0)),
            )
            .unwrap();
        store
            .upsert_concept(&Concept::with_id("b", "b").relation(Relation::new(RelationType::Implies, "c", 1.0)))
            .unwrap();
        store
            .upsert_concept(&Concept::with_id("c", "c").relation(Relation::new(RelationType::Implies, "d", 1.0)))
            .unwrap();
        store.upsert_concept(&Concept::with_id("d", "d")).unwrap();

        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 10, true).unwrap();
        assert_eq!(find(&out.concepts, "b").unwrap().hops, 1);
        assert_eq!(find(&out.concepts, "c").unwrap().hops, 2);
        // default spread_hops is 2
        assert!(find(&out.concepts, "d").is_none());
    }

    #[test]
    fn test_dangling_relation_is_skipped() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(
                &Concept::with_id("a", "a")
                    .embedding(unit(0))
                    .relation(Relation::new(RelationType::Implies, "ghost", 1.0)),
            )
            .unwrap();
        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 10, true).unwrap();
        assert_eq!(out.concepts.len(), 1);
    }

    #[test]
    fn test_zero_decay_still_returned() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(&Concept::with_id("a", "a").embedding(unit(0)).decay_factor(0.0))
            .unwrap();
        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 5, true).unwrap();
        assert_eq!(out.concepts.len(), 1);
        assert_eq!(out.concepts[0].score, 0.0);
    }

    #[test]
    fn test_decay_weighting_can_be_disabled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(&Concept::with_id("a", "a").embedding(unit(0)).decay_factor(0.25))
            .unwrap();
        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 5, false).unwrap();
        assert!((out.concepts[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_on_confidence_then_id() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_concept(&Concept::with_id("b", "b").embedding(unit(0)).confidence(0.5)).unwrap();
        store.upsert_concept(&Concept::with_id("a", "a").embedding(unit(0)).confidence(0.5)).unwrap();
        store.upsert_concept(&Concept::with_id("c", "c").embedding(unit(0)).confidence(0.9)).unwrap();

        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 3, true).unwrap();
        let ids: Vec<&str> = out.concepts.iter().map(|r| r.concept.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_keyword_fallback_when_embedding_down() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_concept(&Concept::with_id("a", "Friday deploys need approval").embedding(unit(0)))
            .unwrap();
        store.upsert_concept(&Concept::with_id("b", "Cache warmup is slow")).unwrap();

        let out = engine(&store, DownEmbedder).retrieve("friday deploys", 5, true).unwrap();
        assert!(!out.embedding_used);
        assert_eq!(out.concepts.len(), 1);
        assert_eq!(out.concepts[0].concept.id, "a");
        assert_eq!(out.concepts[0].source, ActivationSource::Keyword);
        assert!((out.concepts[0].activation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_concepts_without_embedding_merge_by_keyword() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_concept(&Concept::with_id("vec", "vector only").embedding(unit(0))).unwrap();
        store.upsert_concept(&Concept::with_id("bare", "rollback plan")).unwrap();

        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("rollback", 5, true).unwrap();
        let bare = find(&out.concepts, "bare").unwrap();
        assert_eq!(bare.source, ActivationSource::Keyword);
        assert!(find(&out.concepts, "vec").is_some());
    }

    #[test]
    fn test_k_zero_is_empty() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_concept(&Concept::with_id("a", "a").embedding(unit(0))).unwrap();
        let out = engine(&store, FixedEmbedder(unit(0))).retrieve("q", 0, true).unwrap();
        assert!(out.concepts.is_empty());
    }
}
