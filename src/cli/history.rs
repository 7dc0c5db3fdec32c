//! `repromp history` command implementation.

use crate::cli::{App, format_local_time, preview};
use crate::core::{GeneratedContent, HistoryEntry, NewHistoryEntry};
use crate::error::{Error, Result};

/// Default number of entries to show.
const DEFAULT_LIMIT: usize = 20;

/// Maximum length for description preview.
const DESCRIPTION_PREVIEW_LEN: usize = 50;

/// List recent entries for the current identity.
///
/// # Errors
///
/// Returns an error if the history cannot be loaded.
pub async fn list(app: &App, limit: Option<usize>) -> Result<()> {
    let store = app.context.history();
    store.load_history().await?;
    let entries = store.entries();

    if entries.is_empty() {
        println!("No history entries found.");
        return Ok(());
    }

    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    println!(
        "{:<38} {:<17} {:<24} {:>7}  Description",
        "ID", "Created", "Image", "Prompts"
    );
    println!("{}", "─".repeat(110));

    for entry in entries.iter().take(limit) {
        println!(
            "{:<38} {:<17} {:<24} {:>7}  {}",
            entry.id,
            format_local_time(entry.created_at),
            preview(entry.image_name(), 22),
            entry.content.prompts.len(),
            preview(entry.description(), DESCRIPTION_PREVIEW_LEN)
        );
    }

    println!("{}", "─".repeat(110));
    println!(
        "Showing {} of {} entr{} ({} storage)",
        entries.len().min(limit),
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        store.backend().kind()
    );
    Ok(())
}

/// Print one entry in full.
///
/// # Errors
///
/// `NotFound` if no entry has the id, or load errors.
pub async fn show(app: &App, id: &str) -> Result<()> {
    let store = app.context.history();
    store.load_history().await?;
    let entry = store
        .get_entry(id)
        .ok_or_else(|| Error::NotFound(format!("history entry {id}")))?;
    print!("{}", render_entry(&entry));
    Ok(())
}

/// Store a new entry.
///
/// # Errors
///
/// Returns an error if the entry cannot be persisted.
pub async fn add(
    app: &App,
    image: &str,
    description: &str,
    tags: Vec<String>,
    prompts: Vec<String>,
    style: &str,
) -> Result<()> {
    let store = app.context.history();
    store.load_history().await?;

    let prompts = prompts
        .into_iter()
        .map(|text| GeneratedContent::prompt(text, style))
        .collect();
    let entry = NewHistoryEntry::new(image, description)
        .with_tags(tags)
        .with_prompts(prompts);

    let stored = store.add_entry(entry).await?;
    println!("Added {} ({})", stored.id, stored.image_name());
    Ok(())
}

/// Delete one entry.
///
/// # Errors
///
/// Returns an error if the backend delete fails.
pub async fn remove(app: &App, id: &str) -> Result<()> {
    let store = app.context.history();
    store.load_history().await?;
    store.remove_entry(id).await?;
    println!("Removed {id}");
    Ok(())
}

/// Delete every entry for the current identity.
///
/// # Errors
///
/// `InvalidState` without `--yes`, otherwise backend errors.
pub async fn clear(app: &App, yes: bool) -> Result<()> {
    if !yes {
        return Err(Error::InvalidState(
            "refusing to clear history without --yes".to_string(),
        ));
    }
    let store = app.context.history();
    store.clear_history().await?;
    println!("History cleared ({} storage)", store.backend().kind());
    Ok(())
}

/// Multi-line view of an entry.
fn render_entry(entry: &HistoryEntry) -> String {
    let content = &entry.content;
    let mut out = String::new();
    out.push_str(&format!("ID:          {}\n", entry.id));
    out.push_str(&format!("Created:     {}\n", format_local_time(entry.created_at)));
    out.push_str(&format!("Image:       {}\n", content.image_name));
    if let Some(url) = &content.image_url {
        out.push_str(&format!("URL:         {url}\n"));
    }
    out.push_str(&format!(
        "Providers:   {} / {}\n",
        content.analysis_provider, content.prompt_provider
    ));
    if content.credits_used > 0.0 {
        out.push_str(&format!("Credits:     {}\n", content.credits_used));
    }
    if !content.tags.is_empty() {
        out.push_str(&format!("Tags:        {}\n", content.tags.join(", ")));
    }
    if !content.colors.is_empty() {
        out.push_str(&format!("Colors:      {}\n", content.colors.join(", ")));
    }
    out.push_str(&format!("\n{}\n", content.description));

    for (i, prompt) in content.prompts.iter().enumerate() {
        let style = prompt.style.as_deref().unwrap_or("-");
        out.push_str(&format!("\n[{}] {style}\n{}\n", i + 1, prompt.headline()));
    }
    out
}
