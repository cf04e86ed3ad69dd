// System status display: shows DB stats and configuration at a glance.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::db::Database;

/// Display system status to the terminal.
pub async fn show(config: &Config) -> Result<()> {
    let db_path = &config.db_path;
    if !Path::new(db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `kindred init` to set up the database.");
        return Ok(());
    }

    // Database file size
    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    let db = crate::db::open_sqlite(db_path)?;

    let stats = db.stats().await?;
    println!("Profiles: {}", stats.profiles);
    println!(
        "Visits: {} recorded across {} pattern buckets",
        stats.visits, stats.patterns
    );
    println!("Presence rows: {}", stats.presence);
    println!(
        "Matches: {} total, {} connected",
        stats.matches, stats.connected_matches
    );
    println!("Meetup feedback: {}", stats.feedback);

    println!();
    if config.google_maps_api_key.is_empty() {
        println!("Place lookup: disabled (GOOGLE_MAPS_API_KEY not set, visits land in `general`)");
    } else {
        println!("Place lookup: {}", config.geocode_url);
    }
    if config.token_secret.is_empty() {
        println!("Tokens: KINDRED_TOKEN_SECRET not set");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
