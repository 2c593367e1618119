pub mod decay;
pub mod doctor;
pub mod recall;
pub mod stats;

use anyhow::{Context, Result};
use std::sync::Arc;

use mnemo::config::MnemoConfig;
use mnemo::Store;

/// Open the configured database for a one-shot command.
pub fn open_store(config: &MnemoConfig) -> Result<Arc<Store>> {
    let db_path = config.resolved_db_path();
    let store = Store::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    Ok(Arc::new(store))
}

/// Cut `text` to at most `max_chars` characters, appending "..." if truncated.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
