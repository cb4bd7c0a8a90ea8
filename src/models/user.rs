//! User profile as returned by `GET /v2/users/{login}`

use serde::Deserialize;

/// User profile
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub wallet: Option<i64>,
    pub correction_point: Option<i64>,
    #[serde(default)]
    pub cursus_users: Vec<CursusUser>,
    #[serde(default)]
    pub projects_users: Vec<ProjectUser>,
    pub image: Option<UserImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserImage {
    pub link: Option<String>,
    pub versions: Option<ImageVersions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageVersions {
    pub large: Option<String>,
    pub medium: Option<String>,
    pub small: Option<String>,
    pub micro: Option<String>,
}

/// Enrollment in one cursus
#[derive(Debug, Clone, Deserialize)]
pub struct CursusUser {
    pub level: f64,
    #[serde(default)]
    pub skills: Vec<Skill>,
    pub cursus: Cursus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cursus {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Skill {
    pub name: String,
    pub level: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectUser {
    pub id: i64,
    pub final_mark: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "validated?")]
    pub validated: Option<bool>,
    pub cursus_ids: Option<Vec<i64>>,
    pub project: Project,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub name: String,
}

impl UserProfile {
    /// Cursus with the highest level, usually the main one
    pub fn main_cursus(&self) -> Option<&CursusUser> {
        self.cursus_users
            .iter()
            .max_by(|a, b| a.level.total_cmp(&b.level))
    }

    /// Largest available picture
    pub fn image_url(&self) -> Option<&str> {
        let image = self.image.as_ref()?;
        image
            .versions
            .as_ref()
            .and_then(|v| {
                v.large
                    .as_deref()
                    .or(v.medium.as_deref())
                    .or(v.small.as_deref())
                    .or(v.micro.as_deref())
            })
            .or(image.link.as_deref())
    }

    /// Projects attached to `cursus_id`, most recent first
    pub fn projects_in(&self, cursus_id: i64) -> Vec<&ProjectUser> {
        let mut projects: Vec<_> = self
            .projects_users
            .iter()
            .filter(|p| {
                p.cursus_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&cursus_id))
            })
            .collect();
        projects.sort_by(|a, b| b.id.cmp(&a.id));
        projects
    }
}
