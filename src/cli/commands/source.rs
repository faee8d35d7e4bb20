//! Source management commands.

use std::path::PathBuf;

use console::style;

use crate::config::Settings;
use crate::discovery::load_catalogue;
use crate::repository::Storage;

use crate::cli::helpers::{open_storage, truncate};

/// Upsert every source in a YAML catalogue.
pub async fn cmd_source_load(settings: &Settings, file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(|| settings.sources_file.clone());
    let sources = load_catalogue(&path)?;
    let storage = open_storage(settings).await?;

    for source in &sources {
        storage.upsert_source(source).await?;
        println!("  {} {}", style("✓").green(), source.label());
    }

    println!(
        "{} Loaded {} sources from {}",
        style("✓").green(),
        sources.len(),
        path.display()
    );
    Ok(())
}

/// List known sources.
pub async fn cmd_source_list(settings: &Settings) -> anyhow::Result<()> {
    let storage = open_storage(settings).await?;
    let sources = storage.list_sources().await?;

    if sources.is_empty() {
        println!(
            "{} No sources loaded. Run 'bulletin sources load' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Sources").bold());
    println!("{}", "-".repeat(78));
    println!("{:<5} {:<30} {:<10} {:<6} URL", "ID", "Label", "Type", "Active");
    println!("{}", "-".repeat(78));

    for source in sources {
        println!(
            "{:<5} {:<30} {:<10} {:<6} {}",
            source.id,
            truncate(&source.label(), 29),
            source.source_type.as_str(),
            if source.active { "yes" } else { "no" },
            source.url
        );
    }

    Ok(())
}
