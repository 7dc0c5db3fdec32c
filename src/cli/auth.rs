//! `repromp signup`, `login`, `logout` and `whoami` command implementations.

use crate::cli::{App, prompt_line};
use crate::core::ProfileUpdate;
use crate::error::{Error, Result};
use crate::session::AuthClient;
use tracing::warn;

/// Register an account.
///
/// When the backend signs the new user in at once, the profile row is
/// created with the display name. Otherwise the user confirms their email
/// and signs in later.
///
/// # Errors
///
/// `Config` without a hosted backend, otherwise sign-up errors.
pub async fn signup(
    app: &App,
    email: &str,
    password: Option<String>,
    display_name: Option<String>,
) -> Result<()> {
    let client = AuthClient::from_config(&app.config.remote)?;
    let password = match password {
        Some(p) => p,
        None => prompt_line("Password: ")?,
    };
    if password.is_empty() {
        return Err(Error::InvalidState("password is empty".to_string()));
    }

    let Some(identity) = client
        .sign_up(email, &password, display_name.as_deref())
        .await?
    else {
        println!("Account created. Confirm the link sent to {email}, then run `repromp login`.");
        return Ok(());
    };

    app.context.session().sign_in(identity)?;
    app.context.handle_identity_change();
    let fields = ProfileUpdate {
        display_name,
        ..ProfileUpdate::default()
    };
    if let Err(e) = app.context.create_profile(&fields).await {
        warn!(error = %e, "profile creation after sign-up failed");
    }
    if let Err(e) = app.context.initialize().await {
        warn!(error = %e, "initial load after sign-up failed");
    }
    println!("Account created, signed in as {email}");
    Ok(())
}

/// Sign in with email and password.
///
/// The password is read from stdin when not given.
///
/// # Errors
///
/// `Config` without a hosted backend, otherwise sign-in errors.
pub async fn login(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let client = AuthClient::from_config(&app.config.remote)?;
    let password = match password {
        Some(p) => p,
        None => prompt_line("Password: ")?,
    };
    if password.is_empty() {
        return Err(Error::InvalidState("password is empty".to_string()));
    }

    let identity = client.sign_in_with_password(email, &password).await?;
    let user_id = identity.user_id.clone();
    app.context.session().sign_in(identity)?;
    app.context.handle_identity_change();

    // Signed-in data lives only in the hosted backend; load it fresh
    if let Err(e) = app.context.initialize().await {
        warn!(error = %e, "initial load after sign-in failed");
    }
    println!("Signed in as {email} ({user_id})");
    Ok(())
}

/// Sign out and return to local storage.
///
/// # Errors
///
/// Returns an error if the persisted session cannot be cleared.
pub async fn logout(app: &App) -> Result<()> {
    let Some(identity) = app.context.session().current_identity() else {
        println!("Not signed in.");
        return Ok(());
    };

    if let Ok(client) = AuthClient::from_config(&app.config.remote) {
        client.sign_out(&identity).await;
    }
    app.context.session().sign_out()?;
    app.context.handle_identity_change();
    println!("Signed out");
    Ok(())
}

/// Print the current identity and the backend it selects.
pub fn whoami(app: &App) {
    match app.context.session().current_identity() {
        Some(identity) => {
            println!("User:    {}", identity.user_id);
            if let Some(email) = &identity.email {
                println!("Email:   {email}");
            }
        }
        None => println!("Not signed in."),
    }
    println!("Storage: {}", app.context.selection().kind());
}
