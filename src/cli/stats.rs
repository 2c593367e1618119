use anyhow::Result;

use mnemo::config::MnemoConfig;
use mnemo::memory::stats::memory_stats;

/// Display store and decay statistics in the terminal.
pub fn stats(config: &MnemoConfig, json: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let response = memory_stats(&store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Concepts:            {}", response.concepts);
    println!("    with embedding:    {}", response.concepts_with_embedding);
    println!("  Relations:           {}", response.relations);
    println!("  Episodes:            {}", response.episodes);
    println!("    unconsolidated:    {}", response.unconsolidated_episodes);
    println!("  Entities:            {}", response.entities);
    println!("  Entity relations:    {}", response.entity_relations);
    println!();

    println!("Decay:");
    println!("  Enabled:             {}", config.decay.enabled);
    println!(
        "  Below full:          {} / {}",
        response.decay.count_below_full, response.decay.total
    );
    println!("  Average factor:      {:.3}", response.decay.avg_decay_factor);
    println!("  Minimum factor:      {:.3}", response.decay.min_decay_factor);
    println!(
        "  Recalls:             {} (pass every {})",
        response.recall_count, config.decay.interval
    );
    if let Some(ref last) = response.last_decay_at {
        println!("  Last pass:           {last}");
    }
    println!();

    println!("Database size:         {}", super::format_bytes(response.db_size_bytes));
    Ok(())
}
