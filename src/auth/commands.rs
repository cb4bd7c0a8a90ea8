//! `login`, `logout` and `status` subcommands

use anyhow::{Context, Result};

use super::tokens::TokenState;
use crate::config::Config;

/// Make sure a usable token is stored, logging in if needed
pub async fn login(force: bool) -> Result<()> {
    let config = Config::load()?;
    let manager = super::token_manager(&config)?;

    if force {
        manager
            .invalidate_token()
            .await
            .context("Failed to clear stored tokens")?;
    } else if manager.status().await?.state == TokenState::Valid {
        println!("Already logged in. Use --force to re-authenticate.");
        return Ok(());
    }

    manager.get_valid_token().await.context("Login failed")?;
    println!("Login successful.");
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let config = Config::load()?;
    let manager = super::token_manager(&config)?;
    manager.invalidate_token().await?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let manager = super::token_manager(&config)?;
    let status = manager.status().await?;

    println!("Access token: {}", status.state);
    if let Some(expiry) = status.expiry {
        println!("  expires_at: {}", expiry.to_rfc3339());
    }
    println!(
        "Refresh tok:  {}",
        if status.has_refresh_token {
            "present"
        } else {
            "none"
        }
    );

    if let Err(e) = config.credentials() {
        println!("\nWarning: {}", e);
    } else if status.state == TokenState::NoToken && !status.has_refresh_token {
        println!("\nRun 'intra-cli login' to authenticate.");
    }

    Ok(())
}
