//! Generated, archived and remote post models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finished post for one zone, produced once per run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedPost {
    pub title: String,
    pub meta_description: String,
    pub content_html: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Post as it exists on the blogging platform
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RemotePost {
    pub remote_id: String,
    pub title: String,
    pub url: String,
}

/// Local archive index record
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PostMeta {
    /// Date plus slug, unique per day and title
    pub id: String,
    pub title: String,
    pub meta_description: String,
    pub zone_name: String,
    pub tags: Vec<String>,
    pub category: String,
    pub slug: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    /// Remote URL once published
    pub url: Option<String>,
}
