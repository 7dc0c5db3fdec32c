//! `repromp profile` command implementations.

use crate::cli::{App, format_local_time};
use crate::core::{ProfileUpdate, UserProfile};
use crate::error::{Error, Result};

/// Print the profile and usage counters of the current identity.
///
/// # Errors
///
/// Returns an error if the profile cannot be read.
pub async fn run(app: &App) -> Result<()> {
    let profile = app.context.profile().await?;
    print!("{}", render_profile(&profile));
    Ok(())
}

/// Change profile fields of the signed-in user and print the result.
///
/// # Errors
///
/// `NotAuthenticated` when anonymous, `InvalidState` for a blank name,
/// otherwise backend errors.
pub async fn set(app: &App, update: ProfileUpdate) -> Result<()> {
    if update
        .display_name
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err(Error::InvalidState("display name is empty".to_string()));
    }
    let profile = app.context.update_profile(&update).await?;
    print!("{}", render_profile(&profile));
    Ok(())
}

fn render_profile(profile: &UserProfile) -> String {
    let mut lines = vec![format!(
        "Name:            {}",
        profile.display_name.as_deref().unwrap_or(&profile.id)
    )];
    if let Some(email) = &profile.email {
        lines.push(format!("Email:           {email}"));
    }
    if let Some(avatar) = &profile.avatar_url {
        lines.push(format!("Avatar:          {avatar}"));
    }
    if let Some(created) = profile.created_at {
        lines.push(format!("Member since:    {}", format_local_time(created)));
    }
    if let Some(active) = profile.last_active {
        lines.push(format!("Last active:     {}", format_local_time(active)));
    }
    lines.push(format!(
        "Analyses:        {}",
        profile.stats.total_analyses
    ));
    lines.push(format!("Prompts:         {}", profile.stats.total_prompts));
    if let Some(last) = profile.last_analysis {
        lines.push(format!("Last analysis:   {}", format_local_time(last)));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
