use anyhow::{bail, Result};

use mnemo::config::MnemoConfig;
use mnemo::{embedding, RecallMode, Recaller};

/// Run one recall from the terminal. Counts toward the decay trigger like any other recall.
pub fn recall(
    config: &MnemoConfig,
    query: Option<&str>,
    k: Option<usize>,
    entity: Option<&str>,
    json: bool,
) -> Result<()> {
    let query = query.unwrap_or_default();
    if entity.is_none() && query.trim().is_empty() {
        bail!("provide a query or --entity");
    }

    let store = super::open_store(config)?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let recaller = Recaller::new(store, embedder, config)?;
    let k = k.unwrap_or(recaller.default_k());

    let result = recaller.recall(query, k, entity)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.concepts.is_empty() && result.episodes.is_empty() {
        println!("No results found.");
    } else {
        let mode = match result.mode {
            RecallMode::Semantic if result.embedding_used => "semantic",
            RecallMode::Semantic => "keyword fallback",
            RecallMode::Entity => "entity",
        };
        println!("Found {} concept(s) ({mode})\n", result.concepts.len());

        for (i, ranked) in result.concepts.iter().enumerate() {
            println!(
                "  {}. {} (score: {:.4}, decay: {:.2}, confidence: {:.2}, via {:?}, hops: {})",
                i + 1,
                ranked.concept.id,
                ranked.score,
                ranked.concept.decay_factor,
                ranked.concept.confidence,
                ranked.source,
                ranked.hops,
            );
            println!("     {}", super::preview(&ranked.concept.summary, 120));
            println!();
        }

        if !result.episodes.is_empty() {
            println!("Episodes:");
            for episode in &result.episodes {
                println!(
                    "  [{}] {} {}",
                    episode.episode_type,
                    episode.timestamp.format("%Y-%m-%d %H:%M"),
                    super::preview(&episode.content, 100)
                );
            }
            println!();
        }
    }

    println!("Recall count: {}", result.recall_count);
    if result.decay_triggered {
        println!("A decay pass ran after this recall.");
    }
    Ok(())
}
