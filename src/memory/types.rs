//! Core record definitions.
//!
//! Defines [`Concept`] (a generalized unit of knowledge with decay state),
//! [`Relation`] / [`RelationType`] (typed concept graph edges), [`Episode`]
//! (an immutable raw experience), and [`Entity`] / [`EntityRelation`]
//! (external referents produced by extraction).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of concept-to-concept edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Implies,
    Contradicts,
    Specializes,
    Generalizes,
    Causes,
    Correlates,
    PartOf,
    ContextOf,
}

impl RelationType {
    pub const ALL: [RelationType; 8] = [
        Self::Implies,
        Self::Contradicts,
        Self::Specializes,
        Self::Generalizes,
        Self::Causes,
        Self::Correlates,
        Self::PartOf,
        Self::ContextOf,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implies => "implies",
            Self::Contradicts => "contradicts",
            Self::Specializes => "specializes",
            Self::Generalizes => "generalizes",
            Self::Causes => "causes",
            Self::Correlates => "correlates",
            Self::PartOf => "part_of",
            Self::ContextOf => "context_of",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown relation type: {s}"))
    }
}

/// A directed, typed edge from the owning concept to `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub target_id: String,
    /// Edge weight in `[0.0, 1.0]`.
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Relation {
    pub fn new(relation_type: RelationType, target_id: impl Into<String>, strength: f64) -> Self {
        Self {
            relation_type,
            target_id: target_id.into(),
            strength: clamp_unit(strength),
            context: None,
        }
    }
}

/// A generalized unit of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub summary: String,
    /// Reliability in `[0.0, 1.0]`. Independent of decay.
    pub confidence: f64,
    /// Number of supporting episodes.
    pub instance_count: u64,
    /// Dense vector. `None` either because the concept has none (keyword
    /// fallback applies) or because it was loaded through a listing query
    /// that never reads embeddings; only [`crate::Store::get_concept`] loads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ids of entities this concept mentions.
    #[serde(default)]
    pub entity_ids: Vec<String>,
    /// Usage-based priority multiplier in `[0.0, 1.0]`; 1.0 is fully fresh.
    pub decay_factor: f64,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Last rejuvenation; decay passes skip concepts inside the grace window.
    pub rejuvenated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// A fresh concept with a UUID v7 id and default decay state.
    pub fn new(summary: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string(), summary)
    }

    pub fn with_id(id: impl Into<String>, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            summary: summary.into(),
            confidence: 1.0,
            instance_count: 0,
            embedding: None,
            relations: Vec::new(),
            conditions: None,
            exceptions: None,
            tags: Vec::new(),
            entity_ids: Vec::new(),
            decay_factor: 1.0,
            access_count: 0,
            last_accessed: None,
            rejuvenated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn decay_factor(mut self, decay_factor: f64) -> Self {
        self.decay_factor = clamp_unit(decay_factor);
        self
    }

    pub fn mentions(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_ids.push(entity_id.into());
        self
    }

    /// Text the keyword fallback matches against.
    pub fn keyword_text(&self) -> String {
        if self.tags.is_empty() {
            self.summary.clone()
        } else {
            format!("{} {}", self.summary, self.tags.join(" "))
        }
    }
}

/// Category of a raw experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Observation,
    Decision,
    Question,
    Meta,
    Preference,
}

impl EpisodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Decision => "decision",
            Self::Question => "question",
            Self::Meta => "meta",
            Self::Preference => "preference",
        }
    }
}

impl std::fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpisodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(Self::Observation),
            "decision" => Ok(Self::Decision),
            "question" => Ok(Self::Question),
            "meta" => Ok(Self::Meta),
            "preference" => Ok(Self::Preference),
            _ => Err(format!("unknown episode type: {s}")),
        }
    }
}

/// An atomic raw experience. Immutable once written except for the
/// `consolidated` and `entities_extracted` flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub episode_type: EpisodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub consolidated: bool,
    pub entities_extracted: bool,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    pub confidence: f64,
}

impl Episode {
    pub fn new(content: impl Into<String>, episode_type: EpisodeType) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            content: content.into(),
            episode_type,
            summary: None,
            consolidated: false,
            entities_extracted: false,
            entity_ids: Vec::new(),
            confidence: 1.0,
        }
    }
}

/// An external referent, identified as `type:name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let name = name.into();
        let now = Utc::now();
        Self {
            id: format!("{entity_type}:{name}"),
            entity_type,
            name,
            mention_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A directed relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    /// UUID v7 primary key.
    pub id: String,
    pub subject_id: String,
    /// Relationship label (e.g. `"works_at"`, `"depends_on"`).
    pub predicate: String,
    pub object_id: String,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_type_round_trips_through_str() {
        for t in RelationType::ALL {
            assert_eq!(t.as_str().parse::<RelationType>().unwrap(), t);
        }
        assert!("sibling_of".parse::<RelationType>().is_err());
    }

    #[test]
    fn new_concept_is_fully_fresh() {
        let c = Concept::new("retries need jitter");
        assert_eq!(c.decay_factor, 1.0);
        assert_eq!(c.access_count, 0);
        assert!(c.last_accessed.is_none());
        assert!(c.rejuvenated_at.is_none());
    }

    #[test]
    fn builders_clamp_to_unit_interval() {
        let c = Concept::new("x").decay_factor(1.7).confidence(-0.2);
        assert_eq!(c.decay_factor, 1.0);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(Relation::new(RelationType::Causes, "y", 2.0).strength, 1.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }

    #[test]
    fn entity_id_is_type_and_name() {
        let e = Entity::new("person", "ada");
        assert_eq!(e.id, "person:ada");
    }

    #[test]
    fn concept_serializes_relation_type_as_snake_case() {
        let c = Concept::with_id("a", "A").relation(Relation::new(RelationType::PartOf, "b", 0.5));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["relations"][0]["type"], "part_of");
        let back: Concept = serde_json::from_value(json).unwrap();
        assert_eq!(back.relations[0].relation_type, RelationType::PartOf);
    }
}
