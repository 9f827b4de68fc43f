//! Auth command handlers.

use anyhow::{Result, bail};
use authsync_core::config::Config;
use authsync_core::identity::OAuthProvider;
use authsync_core::model::{User, mask_token};
use authsync_core::sync::{
    MagicLinkOutcome, OAuthOutcome, RequestOutcome, SessionSynchronizer, SignInOutcome,
    SignUpOutcome,
};
use authsync_core::validation::{validate_email, validate_registration};

use super::{connect, password_or_prompt, yes_no};

const MAGIC_LINK_SENT: &str = "Check your email for the magic link!";
const RESET_LINK_SENT: &str = "Check your email for the password reset link!";
const PASSWORD_UPDATED: &str = "Password updated successfully!";

fn print_signed_in(user: &User) {
    println!("✓ Signed in as {} <{}>", user.display_name(), user.email);
}

fn require_success(outcome: RequestOutcome) -> Result<()> {
    match outcome {
        RequestOutcome::Success => Ok(()),
        RequestOutcome::Failed(err) => Err(err.into()),
    }
}

fn require_signed_in(sync: &SessionSynchronizer) -> Result<User> {
    match sync.store().auth().user {
        Some(user) => Ok(user),
        None => bail!("Not signed in. Run `authsync signin` first."),
    }
}

pub async fn sign_up(
    config: &Config,
    name: &str,
    email: &str,
    password: Option<String>,
    confirm_password: Option<&str>,
) -> Result<()> {
    let password = password_or_prompt(password, "Password")?;
    // Per-field checks (including the confirmation) before any network setup.
    validate_registration(name, email, &password, confirm_password).into_result()?;

    let sync = connect(config).await?;
    match sync.sign_up(name, email, &password).await {
        SignUpOutcome::Confirmed { user, .. } => {
            print_signed_in(&user);
            Ok(())
        }
        SignUpOutcome::PendingEmailConfirmation { email } => {
            println!("✓ Account created");
            println!("  We've sent a confirmation email to {email}.");
            println!("  Please check your email to confirm your account before signing in.");
            Ok(())
        }
        SignUpOutcome::Failed(err) => Err(err.into()),
    }
}

pub async fn sign_in(config: &Config, email: &str, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password, "Password")?;
    let sync = connect(config).await?;

    match sync.sign_in(email, &password).await {
        SignInOutcome::Success { user, .. } => {
            print_signed_in(&user);
            Ok(())
        }
        SignInOutcome::Failed(err) => Err(err.into()),
    }
}

pub async fn magic_link(config: &Config, email: &str) -> Result<()> {
    // Fail fast before building the provider client.
    validate_email(email)?;

    let sync = connect(config).await?;
    match sync.sign_in_with_magic_link(email).await {
        MagicLinkOutcome::Sent => {
            println!("✓ {MAGIC_LINK_SENT}");
            Ok(())
        }
        MagicLinkOutcome::Failed(err) => Err(err.into()),
    }
}

pub async fn oauth(config: &Config, provider: OAuthProvider) -> Result<()> {
    let sync = connect(config).await?;

    match sync.sign_in_with_oauth(provider).await {
        OAuthOutcome::Initiated { authorization_url } => {
            if let Some(user) = sync.store().auth().user {
                print_signed_in(&user);
            } else {
                println!("Open this URL to continue signing in:");
                println!("  {authorization_url}");
            }
            Ok(())
        }
        OAuthOutcome::Cancelled => {
            println!("Sign-in cancelled.");
            Ok(())
        }
        OAuthOutcome::Failed(err) => Err(err.into()),
    }
}

pub async fn sign_out(config: &Config) -> Result<()> {
    let sync = connect(config).await?;
    let was_signed_in = sync.store().auth().is_authenticated();

    require_success(sync.sign_out().await)?;
    if was_signed_in {
        println!("✓ Signed out");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

pub async fn status(config: &Config, json: bool) -> Result<()> {
    let sync = connect(config).await?;
    let auth = sync.store().auth();

    if json {
        let value = serde_json::json!({
            "status": auth.status().to_string(),
            "user": auth.user,
            "expires_at": auth.session.as_ref().and_then(|s| s.expires_at),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Status: {}", auth.status());
    let (Some(user), Some(session)) = (auth.user, auth.session) else {
        return Ok(());
    };
    println!("User: {}", user.display_name());
    println!("Email: {}", user.email);
    println!("Provider: {}", user.provider);
    println!("Email verified: {}", yes_no(user.email_verified));
    println!("Access token: {}", mask_token(&session.access_token));
    if let Some(expires_at) = session.expires_at_utc() {
        println!("Expires: {expires_at}");
    }
    Ok(())
}

pub async fn reset_password(config: &Config, email: &str) -> Result<()> {
    let sync = connect(config).await?;
    require_success(sync.reset_password(email).await)?;
    println!("✓ {RESET_LINK_SENT}");
    Ok(())
}

pub async fn update_password(config: &Config, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password, "New password")?;
    let sync = connect(config).await?;
    require_signed_in(&sync)?;

    require_success(sync.update_password(&password).await)?;
    println!("✓ {PASSWORD_UPDATED}");
    Ok(())
}

pub async fn profile(config: &Config, name: Option<&str>) -> Result<()> {
    let sync = connect(config).await?;
    let user = require_signed_in(&sync)?;

    let user = match name {
        Some(name) => {
            require_success(sync.update_profile(name).await)?;
            require_signed_in(&sync)?
        }
        None => user,
    };

    println!("Name: {}", user.name.as_deref().unwrap_or("-"));
    println!("Email: {}", user.email);
    println!("Provider: {}", user.provider);
    if let Some(avatar) = &user.avatar {
        println!("Avatar: {avatar}");
    }
    println!("Member since: {}", user.created_at.format("%Y-%m-%d"));
    Ok(())
}

pub async fn complete_redirect(config: &Config, url: &str) -> Result<()> {
    let sync = connect(config).await?;
    require_success(sync.complete_redirect(url).await)?;

    if let Some(user) = sync.store().auth().user {
        print_signed_in(&user);
    }
    Ok(())
}
