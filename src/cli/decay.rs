//! CLI `decay` and `reset-decay` commands.

use anyhow::{bail, Result};

use mnemo::config::MnemoConfig;
use mnemo::DecayEngine;

fn engine(config: &MnemoConfig) -> Result<DecayEngine> {
    let store = super::open_store(config)?;
    Ok(DecayEngine::new(store, config.decay.clone()))
}

/// Run one decay pass now. Works even when periodic decay is disabled.
pub fn decay(config: &MnemoConfig) -> Result<()> {
    let engine = engine(config)?;
    if !engine.enabled() {
        println!("Note: periodic decay is disabled; running a forced pass.");
    }
    let pass = engine.run_pass()?;
    println!(
        "Decayed {} concept(s) by {:.3}.",
        pass.affected, pass.rate
    );

    let stats = engine.stats()?;
    println!(
        "Average decay factor is now {:.3} (minimum {:.3}).",
        stats.avg_decay_factor, stats.min_decay_factor
    );
    Ok(())
}

/// Restore one concept, or all of them, to full freshness.
pub fn reset_decay(config: &MnemoConfig, id: Option<&str>, all: bool) -> Result<()> {
    let engine = engine(config)?;
    match (id, all) {
        (_, true) => {
            let updated = engine.reset_all()?;
            println!("Reset {updated} concept(s) to full freshness.");
        }
        (Some(id), false) => {
            engine.reset(id)?;
            println!("Reset {id} to full freshness.");
        }
        (None, false) => bail!("provide a concept id or --all"),
    }
    Ok(())
}
