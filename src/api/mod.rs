//! API client module for the 42 intranet

pub mod client;
mod user;

use anyhow::Result;

/// Show a user's profile
pub async fn show_user(login: &str) -> Result<()> {
    user::show_user(login).await
}
