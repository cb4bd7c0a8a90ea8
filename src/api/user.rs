//! User profile lookup (/v2/users/{login})

use anyhow::{Context, Result};
use std::sync::Arc;

use super::client::IntraClient;
use crate::auth;
use crate::config::Config;
use crate::models::UserProfile;

const MAX_SKILLS: usize = 5;
const MAX_PROJECTS: usize = 10;

/// Fetch and display a user profile.
pub async fn show_user(login: &str) -> Result<()> {
    let config = Config::load()?;
    let tokens = Arc::new(auth::token_manager(&config)?);
    let client = IntraClient::new(config.http_client()?, &config.api_base, tokens)?;

    let user = client
        .fetch_user(login)
        .await
        .with_context(|| format!("Failed to fetch user '{}'", login.trim()))?;

    print!("{}", render(&user));
    Ok(())
}

fn render(user: &UserProfile) -> String {
    let mut out = String::new();
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "(none)".to_string());

    out.push('\n');
    out.push_str(&format!("Login:        {}\n", user.login));
    out.push_str(&format!("Email:        {}\n", field(&user.email)));
    out.push_str(&format!("Phone:        {}\n", field(&user.phone)));
    out.push_str(&format!(
        "Location:     {}\n",
        user.location.as_deref().unwrap_or("unavailable")
    ));
    out.push_str(&format!("Wallet:       {}\n", user.wallet.unwrap_or(0)));
    out.push_str(&format!(
        "Eval points:  {}\n",
        user.correction_point.unwrap_or(0)
    ));
    if let Some(image) = user.image_url() {
        out.push_str(&format!("Picture:      {}\n", image));
    }

    let Some(main) = user.main_cursus() else {
        return out;
    };
    out.push_str(&format!(
        "\n{} - level {:.2}\n",
        main.cursus.name, main.level
    ));

    let mut skills: Vec<_> = main.skills.iter().collect();
    skills.sort_by(|a, b| b.level.total_cmp(&a.level));
    for skill in skills.into_iter().take(MAX_SKILLS) {
        out.push_str(&format!("  {:<32} {:.2}\n", skill.name, skill.level));
    }

    let projects = user.projects_in(main.cursus.id);
    if !projects.is_empty() {
        out.push_str("\nProjects:\n");
        for p in projects.into_iter().take(MAX_PROJECTS) {
            let mark = match (p.validated, p.final_mark) {
                (_, None) => p.status.clone().unwrap_or_default(),
                (Some(true), Some(m)) => format!("{} ok", m),
                (_, Some(m)) => format!("{} ko", m),
            };
            out.push_str(&format!("  {:<32} {}\n", p.project.name, mark));
        }
    }

    out
}
