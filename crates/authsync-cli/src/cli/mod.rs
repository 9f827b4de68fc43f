//! CLI entry and dispatch.

use anyhow::{Context, Result};
use authsync_core::config;
use authsync_core::identity::OAuthProvider;
use authsync_core::logging;
use authsync_core::store::ThemePreference;
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "authsync")]
#[command(version)]
#[command(about = "Sign in to a GoTrue-compatible identity provider and keep the session in sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Password input shared by commands that take one.
#[derive(clap::Args, Debug, Clone)]
struct PasswordArgs {
    /// Password (prompted on stdin when omitted)
    #[arg(long, env = "AUTHSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create an account with email and password
    Signup {
        /// Display name
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[command(flatten)]
        password: PasswordArgs,
        /// Repeat the password; checked before anything is sent
        #[arg(long = "confirm-password")]
        confirm_password: Option<String>,
    },

    /// Sign in with email and password
    Signin {
        #[arg(long)]
        email: String,
        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Email a one-time sign-in link
    MagicLink {
        #[arg(long)]
        email: String,
    },

    /// Sign in through an OAuth provider in the browser
    Oauth {
        /// Provider name (google, github, ...)
        #[arg(long, default_value = "google")]
        provider: OAuthProvider,
    },

    /// Sign out and clear the stored session
    Signout,

    /// Show the current session
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Email a password reset link
    ResetPassword {
        #[arg(long)]
        email: String,
    },

    /// Set a new password for the signed-in user
    UpdatePassword {
        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Show or edit the signed-in user's profile
    Profile {
        /// New display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Finish a sign-in from a redirect URL (magic link, OAuth, recovery)
    CompleteRedirect {
        /// The full redirect URL, including any fragment
        url: String,
    },

    /// Manage local preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum PrefsCommands {
    /// Show all preferences
    Show,
    /// Set the color scheme (light, dark, auto)
    SetTheme { theme: ThemePreference },
    /// Flip the effective color scheme
    ToggleTheme,
    /// Set the language code
    SetLanguage { language: String },
    /// Mark onboarding as completed
    CompleteOnboarding {
        /// Mark as not completed instead
        #[arg(long)]
        reset: bool,
    },
    /// Delete all stored preferences
    Reset,
    /// Update notification toggles; omitted toggles keep their value
    Notifications {
        #[arg(long)]
        push: Option<bool>,
        #[arg(long)]
        email: Option<bool>,
        #[arg(long)]
        marketing: Option<bool>,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Create a config file with defaults
    Init,
    /// Print a fresh config generated from defaults
    Generate,
    /// Save the provider URL and anon key
    SetProvider {
        #[arg(long)]
        url: String,
        #[arg(long = "anon-key")]
        anon_key: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        // Config commands must work with a broken or missing config.
        Commands::Config { command } => config_command(command),
        command => {
            let config = config::Config::load().context("load config")?;
            let _log_guard = logging::init(&config.log).context("init logging")?;
            tracing::debug!(
                app = %config.app_name,
                environment = %config.environment.display_name(),
                "starting"
            );
            run_command(&config, command).await
        }
    }
}

fn config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Path => {
            commands::config::path();
            Ok(())
        }
        ConfigCommands::Init => commands::config::init(),
        ConfigCommands::Generate => commands::config::generate(),
        ConfigCommands::SetProvider { url, anon_key } => {
            commands::config::set_provider(&url, &anon_key)
        }
    }
}

async fn run_command(config: &config::Config, command: Commands) -> Result<()> {
    match command {
        Commands::Signup {
            name,
            email,
            password,
            confirm_password,
        } => {
            commands::auth::sign_up(
                config,
                &name,
                &email,
                password.password,
                confirm_password.as_deref(),
            )
            .await
        }
        Commands::Signin { email, password } => {
            commands::auth::sign_in(config, &email, password.password).await
        }
        Commands::MagicLink { email } => commands::auth::magic_link(config, &email).await,
        Commands::Oauth { provider } => commands::auth::oauth(config, provider).await,
        Commands::Signout => commands::auth::sign_out(config).await,
        Commands::Status { json } => commands::auth::status(config, json).await,
        Commands::ResetPassword { email } => commands::auth::reset_password(config, &email).await,
        Commands::UpdatePassword { password } => {
            commands::auth::update_password(config, password.password).await
        }
        Commands::Profile { name } => commands::auth::profile(config, name.as_deref()).await,
        Commands::CompleteRedirect { url } => commands::auth::complete_redirect(config, &url).await,
        Commands::Prefs { command } => match command {
            PrefsCommands::Show => commands::prefs::show().await,
            PrefsCommands::SetTheme { theme } => commands::prefs::set_theme(theme).await,
            PrefsCommands::ToggleTheme => commands::prefs::toggle_theme().await,
            PrefsCommands::SetLanguage { language } => {
                commands::prefs::set_language(&language).await
            }
            PrefsCommands::CompleteOnboarding { reset } => {
                commands::prefs::complete_onboarding(!reset).await
            }
            PrefsCommands::Reset => commands::prefs::reset().await,
            PrefsCommands::Notifications {
                push,
                email,
                marketing,
            } => commands::prefs::notifications(push, email, marketing).await,
        },
        Commands::Config { command } => config_command(command),
    }
}
