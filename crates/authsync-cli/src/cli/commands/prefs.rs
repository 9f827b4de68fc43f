//! Preference command handlers.

use anyhow::Result;
use authsync_core::preferences::{Preferences, system_color_scheme};
use authsync_core::store::{NotificationsPatch, ThemePreference};

use super::{load_preferences, on_off, yes_no};

fn print_theme(prefs: &Preferences) {
    let theme = prefs.store().preferences().theme;
    let effective = prefs.color_scheme(system_color_scheme());
    if theme == ThemePreference::Auto {
        println!("Theme: auto ({effective})");
    } else {
        println!("Theme: {theme}");
    }
}

pub async fn show() -> Result<()> {
    let prefs = load_preferences().await?;
    let current = prefs.store().preferences();

    print_theme(&prefs);
    println!("Language: {}", current.language);
    println!("Onboarding completed: {}", yes_no(current.onboarding_completed));
    println!(
        "Notifications: push={} email={} marketing={}",
        on_off(current.notifications.push),
        on_off(current.notifications.email),
        on_off(current.notifications.marketing)
    );
    Ok(())
}

pub async fn set_theme(theme: ThemePreference) -> Result<()> {
    let prefs = load_preferences().await?;
    prefs.set_theme(theme).await?;
    print_theme(&prefs);
    Ok(())
}

pub async fn toggle_theme() -> Result<()> {
    let prefs = load_preferences().await?;
    let scheme = prefs.toggle_theme(system_color_scheme()).await?;
    println!("Theme: {scheme}");
    Ok(())
}

pub async fn set_language(language: &str) -> Result<()> {
    let prefs = load_preferences().await?;
    prefs.set_language(language).await?;
    println!("Language: {}", prefs.store().preferences().language);
    Ok(())
}

pub async fn complete_onboarding(done: bool) -> Result<()> {
    let prefs = load_preferences().await?;
    prefs.set_onboarding_completed(done).await?;
    println!("Onboarding completed: {}", yes_no(done));
    Ok(())
}

pub async fn reset() -> Result<()> {
    let prefs = load_preferences().await?;
    prefs.reset().await?;
    println!("✓ Preferences reset");
    Ok(())
}

pub async fn notifications(
    push: Option<bool>,
    email: Option<bool>,
    marketing: Option<bool>,
) -> Result<()> {
    let prefs = load_preferences().await?;
    let patch = NotificationsPatch {
        push,
        email,
        marketing,
    };
    let settings = if patch.is_empty() {
        prefs.store().preferences().notifications
    } else {
        prefs.update_notifications(patch).await?
    };
    println!(
        "Notifications: push={} email={} marketing={}",
        on_off(settings.push),
        on_off(settings.email),
        on_off(settings.marketing)
    );
    Ok(())
}
