//! `repromp unlock` command implementation.

use crate::cli::{App, format_local_time, prompt_line};
use crate::error::{Error, Result};
use crate::gate::GateState;

/// Open the access gate.
///
/// Reads the password from stdin when not given. With `forget`, drops a
/// previous unlock instead.
///
/// # Errors
///
/// `GateLocked` or `GateDenied` on failure, or storage errors.
pub fn run(app: &App, password: Option<String>, forget: bool) -> Result<()> {
    if forget {
        app.gate.lock()?;
        println!("Access locked");
        return Ok(());
    }

    match app.gate.state()? {
        GateState::Disabled => {
            println!("No access password configured.");
            return Ok(());
        }
        GateState::Unlocked { expires_at } => {
            println!("Already unlocked until {}", format_local_time(expires_at));
            return Ok(());
        }
        GateState::Locked { remaining_secs } => {
            return Err(Error::GateLocked { remaining_secs });
        }
        GateState::Closed { .. } => {}
    }

    let password = match password {
        Some(p) => p,
        None => prompt_line("Access password: ")?,
    };
    if let GateState::Unlocked { expires_at } = app.gate.unlock(&password)? {
        println!("Unlocked until {}", format_local_time(expires_at));
    }
    Ok(())
}
