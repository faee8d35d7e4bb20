//! History command: snapshot lineage for one URL.

use console::style;

use crate::cli::helpers::{open_storage, truncate};
use crate::config::Settings;
use crate::repository::Storage;
use crate::utils::normalize_url;

pub async fn cmd_history(settings: &Settings, url: &str, show_diffs: bool) -> anyhow::Result<()> {
    let storage = open_storage(settings).await?;
    let key = normalize_url(url).unwrap_or_else(|| url.to_string());

    let Some(seen) = storage.get_seen_url(&key).await? else {
        println!("{} {} has never been fetched", style("!").yellow(), key);
        return Ok(());
    };
    let Some(document) = storage.find_document_by_url(seen.source_id, &key).await? else {
        println!(
            "{} {} was fetched but never produced a document",
            style("!").yellow(),
            key
        );
        return Ok(());
    };

    println!("\n{} {}", style("Document").bold(), document.id);
    println!("  URL:          {}", document.url);
    println!("  First fetch:  {}", document.fetched_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Last fetch:   {}", seen.last_fetched.format("%Y-%m-%d %H:%M:%S"));
    println!("  Raw payload:  {}", document.raw_uri);

    let snapshots = storage.list_snapshots(document.id).await?;
    println!("\n{} ({})", style("Snapshots").bold(), snapshots.len());
    println!("{}", "-".repeat(78));

    for snapshot in &snapshots {
        let diff = storage.get_diff_for_snapshot(snapshot.id).await?;
        let significance = diff
            .as_ref()
            .map(|d| d.significance.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<5} {}  {:<10} score {:>2}  sig {:>3}  {}",
            snapshot.id,
            snapshot.captured_at.format("%Y-%m-%d %H:%M"),
            truncate(&snapshot.topic, 10),
            snapshot.score,
            significance,
            truncate(&snapshot.title, 36)
        );
        if let Some(date) = snapshot.effective_date {
            println!("      effective {}", date);
        }

        if show_diffs {
            if let Some(diff) = diff {
                for line in diff.diff_text.lines() {
                    let styled = if line.starts_with("+ ") {
                        style(line).green()
                    } else if line.starts_with("- ") {
                        style(line).red()
                    } else {
                        style(line).cyan()
                    };
                    println!("      {}", styled);
                }
            }
        }
    }

    Ok(())
}
