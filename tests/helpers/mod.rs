#![allow(dead_code)]

use mnemo::config::MnemoConfig;
use mnemo::embedding::EmbeddingProvider;
use mnemo::{Concept, Error, Recaller, Relation, RelationType, Store};
use std::path::Path;
use std::sync::Arc;

pub const DIM: usize = 16;

/// Unit vector with a spike at `dim`. Distinct dims are orthogonal.
pub fn unit(dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[dim % DIM] = 1.0;
    v
}

/// Unit vector with cosine `cos` to `unit(along)`, the remainder on `unit(rest)`.
pub fn at_cosine(along: usize, rest: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[along] = cos;
    v[rest] = (1.0 - cos * cos).sqrt();
    v
}

/// Embeds every query to the same vector.
pub struct FixedEmbedder(pub Vec<f32>);

impl EmbeddingProvider for FixedEmbedder {
    fn embed(&self, _text: &str) -> mnemo::Result<Vec<f32>> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "fixed-test"
    }
}

/// Always unavailable, forcing the keyword path.
pub struct OfflineEmbedder;

impl EmbeddingProvider for OfflineEmbedder {
    fn embed(&self, _text: &str) -> mnemo::Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable("offline".into()))
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

pub fn memory_store() -> Arc<Store> {
    Arc::new(Store::open_in_memory().unwrap())
}

pub fn file_store(path: &Path) -> Arc<Store> {
    Arc::new(Store::open(path).unwrap())
}

pub fn recaller(store: &Arc<Store>, query: Vec<f32>, config: &MnemoConfig) -> Recaller {
    Recaller::new(Arc::clone(store), Arc::new(FixedEmbedder(query)), config).unwrap()
}

/// Insert a concept with an embedding and optional outgoing edges.
pub fn put(store: &Store, id: &str, embedding: Vec<f32>, edges: &[(RelationType, &str, f64)]) {
    let mut concept = Concept::with_id(id, format!("concept {id}")).embedding(embedding);
    for (relation_type, target, strength) in edges {
        concept = concept.relation(Relation::new(*relation_type, *target, *strength));
    }
    store.upsert_concept(&concept).unwrap();
}

pub fn decay_factor(store: &Store, id: &str) -> f64 {
    store.get_concept(id).unwrap().unwrap().decay_factor
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
