//! Extract command: run the content extractor on a local file.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::cli::helpers::build_extractor;
use crate::config::Settings;
use crate::utils::detect_mime;

pub async fn cmd_extract(
    settings: &Settings,
    file: &Path,
    mime: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let mime = detect_mime(&file.display().to_string(), mime, &bytes);
    let extractor = Arc::new(build_extractor(settings));

    let mime_for_task = mime.clone();
    let extracted =
        tokio::task::spawn_blocking(move || extractor.extract(&bytes, &mime_for_task)).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&extracted)?);
        return Ok(());
    }

    println!("{} {}", style("Title:").bold(), extracted.title);
    println!("  MIME:           {} (via {})", mime, extracted.method);
    println!(
        "  Topic:          {} (score {})",
        extracted.fields.topic, extracted.fields.score
    );
    if let Some(date) = extracted.fields.effective_date {
        println!("  Effective date: {}", date);
    }
    if let Some(ref form) = extracted.fields.form_id {
        println!("  Form:           {}", form);
    }
    if let Some(ref revision) = extracted.pdf_revision {
        println!("  PDF revision:   {}", revision);
    }
    println!("  Content hash:   {}", extracted.content_hash);
    for note in &extracted.notes {
        println!("  {} {}", style("!").yellow(), note);
    }

    println!("\n{}", extracted.normalized_text);
    Ok(())
}
