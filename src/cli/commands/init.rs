//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::ocr::check_tools;
use crate::repository::Storage;

use crate::cli::helpers::open_storage;

/// Create the data directory and database schema, and report tool availability.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let storage = open_storage(settings).await?;
    let counts = storage.counts().await?;

    println!(
        "{} Initialized bulletin monitor in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", settings.database_url());
    match (&settings.raw_storage_bucket, &settings.raw_storage_endpoint) {
        (Some(bucket), Some(endpoint)) => {
            println!("  Payloads: s3://{} via {}", bucket, endpoint)
        }
        (Some(bucket), None) => println!("  Payloads: s3://{}", bucket),
        _ => println!("  Payloads: {}", settings.raw_storage_dir.display()),
    }
    println!(
        "  {} sources, {} documents, {} snapshots",
        counts.sources, counts.documents, counts.snapshots
    );

    for (tool, available) in check_tools() {
        if available {
            println!("  {} {}", style("✓").green(), tool);
        } else {
            println!("  {} {} not found", style("!").yellow(), tool);
        }
    }

    if counts.sources == 0 {
        println!(
            "\nLoad a catalogue with: bulletin sources load {}",
            settings.sources_file.display()
        );
    }

    Ok(())
}
