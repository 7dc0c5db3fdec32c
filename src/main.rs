//! repromp CLI - history and settings for the image-to-prompt assistant.

use clap::{Parser, Subcommand};
use repromp::cli::{self, App};
use repromp::core::ProfileUpdate;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repromp")]
#[command(author, version, about = "History and settings for the repromp image-to-prompt assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and edit analysis history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show and change API keys and default parameters.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Create an account on the hosted backend.
    Signup {
        /// Account email.
        email: String,

        /// Account password. Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,

        /// Name shown on the profile.
        #[arg(long)]
        name: Option<String>,
    },

    /// Sign in to the hosted backend.
    Login {
        /// Account email.
        email: String,

        /// Account password. Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign out and return to local storage.
    Logout,

    /// Show the signed-in identity and the storage in use.
    Whoami,

    /// Show or edit the profile and usage counters.
    Profile {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },

    /// Enter the access password.
    Unlock {
        /// Access password. Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,

        /// Forget a previous unlock instead.
        #[arg(long)]
        forget: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List recent entries.
    List {
        /// Maximum number of entries to show. Defaults to 20.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one entry in full.
    Show {
        /// Entry ID.
        id: String,
    },

    /// Record an analysis.
    Add {
        /// Image file name.
        #[arg(long)]
        image: String,

        /// Image description.
        #[arg(long)]
        description: String,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Generated prompt (repeatable).
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        /// Style label for the prompts.
        #[arg(long, default_value = "photographic")]
        style: String,
    },

    /// Delete one entry.
    Remove {
        /// Entry ID.
        id: String,
    },

    /// Delete every entry.
    Clear {
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the profile (default).
    Show,

    /// Change the display name.
    SetName {
        /// New display name.
        name: String,
    },

    /// Change the avatar image URL.
    SetAvatar {
        /// Image URL.
        url: String,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show keys (masked) and default parameters.
    Show,

    /// Set a provider API key; an empty key clears it.
    SetKey {
        /// Provider (visionati or straico).
        provider: String,

        /// API key.
        key: String,
    },

    /// Change default parameters.
    SetParams {
        /// field=value pairs, e.g. mood=Dramatic.
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Export keys to a settings file.
    Export {
        /// Output file. Prints to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import keys from a settings file.
    Import {
        /// Settings file.
        input: PathBuf,
    },
}

/// Install the stderr log subscriber.
///
/// `REPROMP_LOG` wins over `RUST_LOG`; the default is `warn`.
fn init_logging() {
    let filter = std::env::var("REPROMP_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(command: Commands) -> repromp::Result<()> {
    let app = App::open()?;

    if !matches!(command, Commands::Unlock { .. }) {
        app.require_unlocked()?;
    }

    match command {
        Commands::History { action } => match action {
            HistoryAction::List { limit } => cli::history::list(&app, limit).await,
            HistoryAction::Show { id } => cli::history::show(&app, &id).await,
            HistoryAction::Add {
                image,
                description,
                tags,
                prompts,
                style,
            } => cli::history::add(&app, &image, &description, tags, prompts, &style).await,
            HistoryAction::Remove { id } => cli::history::remove(&app, &id).await,
            HistoryAction::Clear { yes } => cli::history::clear(&app, yes).await,
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => cli::settings::show(&app).await,
            SettingsAction::SetKey { provider, key } => {
                cli::settings::set_key(&app, &provider, &key).await
            }
            SettingsAction::SetParams { pairs } => cli::settings::set_params(&app, &pairs).await,
            SettingsAction::Export { output } => {
                cli::settings::export(&app, output.as_deref()).await
            }
            SettingsAction::Import { input } => cli::settings::import(&app, &input).await,
        },
        Commands::Signup {
            email,
            password,
            name,
        } => cli::auth::signup(&app, &email, password, name).await,
        Commands::Login { email, password } => cli::auth::login(&app, &email, password).await,
        Commands::Logout => cli::auth::logout(&app).await,
        Commands::Whoami => {
            cli::auth::whoami(&app);
            Ok(())
        }
        Commands::Profile { action } => match action.unwrap_or(ProfileAction::Show) {
            ProfileAction::Show => cli::profile::run(&app).await,
            ProfileAction::SetName { name } => {
                cli::profile::set(&app, ProfileUpdate::display_name(name)).await
            }
            ProfileAction::SetAvatar { url } => {
                let update = ProfileUpdate {
                    avatar_url: Some(url),
                    ..ProfileUpdate::default()
                };
                cli::profile::set(&app, update).await
            }
        },
        Commands::Unlock { password, forget } => cli::unlock::run(&app, password, forget),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("repromp: error: {e}");
            ExitCode::FAILURE
        }
    }
}
