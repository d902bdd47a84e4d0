//! Local archive of generated posts
//!
//! Every post is written as a standalone HTML file next to a JSON index
//! (`posts_index.json`). Derived pages (dashboard, monthly archive,
//! per-category lists and `sitemap.xml`) are rebuilt from the index after
//! each change, so they can always be regenerated from scratch.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::html::escape_html;
use crate::models::{GeneratedPost, PostMeta};

const INDEX_FILE: &str = "posts_index.json";
const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
const MAX_SLUG_LEN: usize = 80;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("static pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Keyword found in a post -> tag added to it
const KEYWORD_TAGS: &[(&str, &str)] = &[
    ("snow", "Snow"),
    ("blizzard", "Blizzard"),
    ("cold", "Cold Wave"),
    ("chill", "Cold Wave"),
    ("freezing", "Freezing Temperatures"),
    ("frost", "Frost"),
    ("ice", "Ice"),
    ("storm", "Storms"),
    ("thunderstorm", "Thunderstorms"),
    ("severe", "Severe Weather"),
    ("tornado", "Tornado Risk"),
    ("flood", "Flooding"),
    ("rain", "Heavy Rain"),
    ("showers", "Rain Showers"),
    ("heat", "Heatwave"),
    ("hot", "Heatwave"),
    ("wildfire", "Wildfire Risk"),
    ("smoke", "Air Quality"),
    ("air quality", "Air Quality"),
    ("wind", "High Winds"),
    ("gust", "High Winds"),
    ("travel", "Travel Disruptions"),
    ("aviation", "Aviation Weather"),
];

/// Keywords as whole-word (prefix) matchers, so "ice" does not tag "price"
static KEYWORD_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    KEYWORD_TAGS
        .iter()
        .filter_map(|(kw, tag)| {
            Regex::new(&format!(r"\b{}", regex::escape(kw)))
                .ok()
                .map(|re| (re, *tag))
        })
        .collect()
});

const REGION_TAGS: &[(&str, &str)] = &[
    ("eastern", "Eastern US"),
    ("central", "Central US"),
    ("western", "Western US"),
    ("southern", "Southern US"),
];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive index could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sitemap could not be encoded: {message}")]
    Sitemap { message: String },

    #[error("no archived post with id {id}")]
    UnknownPost { id: String },
}

/// URL-safe slug: lowercase, punctuation dropped, whitespace runs to `-`
#[must_use]
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    let dashed = WHITESPACE.replace_all(&stripped, "-");
    let slug: String = dashed.chars().take(MAX_SLUG_LEN).collect();
    if slug.is_empty() { "post".to_string() } else { slug }
}

/// Zone, region, weather-keyword and fixed tags, sorted and unique
#[must_use]
pub fn auto_generate_tags(title: &str, content_html: &str, zone_name: &str) -> Vec<String> {
    let corpus = format!("{title}\n{content_html}").to_lowercase();
    let mut tags = BTreeSet::new();

    if !zone_name.is_empty() {
        tags.insert(zone_name.to_string());
        let zone_lower = zone_name.to_lowercase();
        for (needle, tag) in REGION_TAGS {
            if zone_lower.contains(needle) {
                tags.insert((*tag).to_string());
            }
        }
    }

    for (pattern, tag) in KEYWORD_PATTERNS.iter() {
        if pattern.is_match(&corpus) {
            tags.insert((*tag).to_string());
        }
    }

    tags.insert("USA Weather".to_string());
    tags.insert("Weather Forecast".to_string());
    tags.into_iter().collect()
}

#[derive(Debug, Serialize)]
#[serde(rename = "urlset")]
struct UrlSet {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "url")]
    urls: Vec<SitemapUrl>,
}

#[derive(Debug, Serialize)]
struct SitemapUrl {
    loc: String,
    lastmod: String,
}

fn page(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n{head_extra}</head>\n<body>\n{body}\n</body>\n</html>\n",
        escape_html(title)
    )
}

fn newest_first(posts: &[PostMeta]) -> Vec<&PostMeta> {
    let mut sorted: Vec<&PostMeta> = posts.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted
}

/// Flat-file archive rooted at an output directory
pub struct LocalArchive {
    output_dir: PathBuf,
    blog_base_url: Option<String>,
}

impl LocalArchive {
    pub fn new(output_dir: impl Into<PathBuf>, blog_base_url: Option<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            blog_base_url: blog_base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn index_path(&self) -> PathBuf {
        self.output_dir.join(INDEX_FILE)
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ArchiveError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.output_dir.join(name);
        std::fs::write(&path, contents).map_err(|source| ArchiveError::Io { path, source })
    }

    /// Index records; a missing or unreadable index reads as empty
    #[must_use]
    pub fn load_index(&self) -> Vec<PostMeta> {
        let path = self.index_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read archive index, treating as empty");
                return Vec::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Could not parse archive index, treating as empty");
            Vec::new()
        })
    }

    fn save_index(&self, posts: &[PostMeta]) -> Result<(), ArchiveError> {
        let json = serde_json::to_string_pretty(posts)?;
        self.write(INDEX_FILE, &json)
    }

    /// Write the post file, upsert its index record and rebuild derived pages
    pub fn persist(
        &self,
        post: &GeneratedPost,
        zone_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PostMeta, ArchiveError> {
        let slug = slugify(&post.title);
        let id = format!("{}-{slug}", now.format("%Y-%m-%d"));
        let filename = format!("{id}.html");

        let meta = PostMeta {
            id,
            title: post.title.clone(),
            meta_description: post.meta_description.clone(),
            zone_name: zone_name.to_string(),
            tags: auto_generate_tags(&post.title, &post.content_html, zone_name),
            category: if zone_name.is_empty() {
                "USA Weather".to_string()
            } else {
                zone_name.to_string()
            },
            slug,
            filename,
            created_at: now,
            url: None,
        };

        let head = format!(
            "<meta name=\"description\" content=\"{}\" />\n",
            escape_html(&post.meta_description)
        );
        self.write(&meta.filename, &page(&post.title, &head, &post.content_html))?;

        let mut posts = self.load_index();
        match posts.iter_mut().find(|p| p.id == meta.id) {
            Some(existing) => *existing = meta.clone(),
            None => posts.push(meta.clone()),
        }
        self.save_index(&posts)?;
        self.regenerate_from(&posts)?;

        info!(path = %self.output_dir.join(&meta.filename).display(), "Post saved locally");
        Ok(meta)
    }

    /// Attach the published URL to an archived post
    pub fn record_url(&self, id: &str, url: &str) -> Result<(), ArchiveError> {
        let mut posts = self.load_index();
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ArchiveError::UnknownPost { id: id.to_string() })?;
        post.url = Some(url.to_string());

        self.save_index(&posts)?;
        self.regenerate_from(&posts)
    }

    /// Rebuild every derived page from the index on disk
    pub fn regenerate(&self) -> Result<usize, ArchiveError> {
        let posts = self.load_index();
        self.regenerate_from(&posts)?;
        Ok(posts.len())
    }

    fn regenerate_from(&self, posts: &[PostMeta]) -> Result<(), ArchiveError> {
        self.write("index.html", &self.dashboard_html(posts))?;
        self.write(
            "archive.html",
            &page("Weather Blog Archive", "", &monthly_sections(posts, |p| {
                format!("./{}", p.filename)
            })),
        )?;
        for (category, html) in self.category_pages(posts) {
            self.write(&format!("category-{}.html", slugify(&category)), &html)?;
        }
        self.write("sitemap.xml", &self.sitemap_xml(posts)?)?;
        debug!(posts = posts.len(), "Archive pages regenerated");
        Ok(())
    }

    fn dashboard_html(&self, posts: &[PostMeta]) -> String {
        let rows: Vec<String> = newest_first(posts)
            .into_iter()
            .map(|p| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td><a href=\"./{}\" target=\"_blank\">{}</a></td><td>{}</td><td>{}</td></tr>",
                    p.created_at.format("%Y-%m-%d"),
                    escape_html(&p.zone_name),
                    p.filename,
                    escape_html(&p.title),
                    escape_html(&p.tags.join(", ")),
                    p.url
                        .as_deref()
                        .map_or_else(|| "local only".to_string(), |u| {
                            format!("<a href=\"{}\">published</a>", escape_html(u))
                        })
                )
            })
            .collect();
        let rows = if rows.is_empty() {
            "<tr><td colspan=\"5\">No posts yet.</td></tr>".to_string()
        } else {
            rows.join("\n")
        };

        let style = "<style>\nbody { font-family: Arial, sans-serif; margin: 20px; }\n\
                     table { border-collapse: collapse; width: 100%; }\n\
                     th, td { border: 1px solid #ccc; padding: 8px; text-align: left; }\n\
                     th { background-color: #f0f0f0; }\n</style>\n";
        let body = format!(
            "<h1>Generated Weather Posts Dashboard</h1>\n<table>\n<thead>\n\
             <tr><th>Date</th><th>Zone</th><th>Title</th><th>Tags</th><th>Status</th></tr>\n\
             </thead>\n<tbody>\n{rows}\n</tbody>\n</table>"
        );
        page("Generated Weather Posts Dashboard", style, &body)
    }

    fn category_pages(&self, posts: &[PostMeta]) -> BTreeMap<String, String> {
        let mut by_category: BTreeMap<&str, Vec<&PostMeta>> = BTreeMap::new();
        for post in newest_first(posts) {
            by_category.entry(&post.category).or_default().push(post);
        }

        by_category
            .into_iter()
            .map(|(category, posts)| {
                let items: Vec<String> = posts
                    .iter()
                    .map(|p| {
                        format!(
                            "<li>{} – <a href=\"./{}\" target=\"_blank\">{}</a></li>",
                            p.created_at.format("%Y-%m-%d"),
                            p.filename,
                            escape_html(&p.title)
                        )
                    })
                    .collect();
                let title = format!("{category} Weather Posts");
                let body = format!(
                    "<h1>{}</h1>\n<ul>\n{}\n</ul>",
                    escape_html(&title),
                    items.join("\n")
                );
                (category.to_string(), page(&title, "", &body))
            })
            .collect()
    }

    /// Remote URL, or a best-effort permalink guess under the blog base URL
    fn public_url(&self, post: &PostMeta) -> Option<String> {
        post.url.clone().or_else(|| {
            self.blog_base_url
                .as_ref()
                .map(|base| format!("{base}/{}.html", post.slug))
        })
    }

    fn sitemap_xml(&self, posts: &[PostMeta]) -> Result<String, ArchiveError> {
        let urls: Vec<SitemapUrl> = posts
            .iter()
            .filter_map(|p| {
                let loc = self.public_url(p);
                if loc.is_none() {
                    debug!(id = %p.id, "No public URL known, left out of sitemap");
                }
                loc.map(|loc| SitemapUrl {
                    loc,
                    lastmod: p.created_at.format("%Y-%m-%d").to_string(),
                })
            })
            .collect();

        let body = quick_xml::se::to_string(&UrlSet {
            xmlns: SITEMAP_NS,
            urls,
        })
        .map_err(|e| ArchiveError::Sitemap {
            message: e.to_string(),
        })?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}\n"))
    }

    /// Month-grouped list of published posts for the remote archive page
    #[must_use]
    pub fn archive_page_html(&self) -> String {
        let published: Vec<PostMeta> = self
            .load_index()
            .into_iter()
            .filter(|p| p.url.is_some())
            .collect();
        monthly_sections(&published, |p| p.url.clone().unwrap_or_default())
    }
}

/// `<h2>YYYY-MM</h2>` sections, newest month and post first
fn monthly_sections(posts: &[PostMeta], href: impl Fn(&PostMeta) -> String) -> String {
    let mut by_month: BTreeMap<String, Vec<&PostMeta>> = BTreeMap::new();
    for post in newest_first(posts) {
        by_month
            .entry(post.created_at.format("%Y-%m").to_string())
            .or_default()
            .push(post);
    }

    if by_month.is_empty() {
        return "<h1>Weather Blog Archive</h1>\n<p>No posts yet.</p>".to_string();
    }

    let sections: Vec<String> = by_month
        .iter()
        .rev()
        .map(|(month, posts)| {
            let items: Vec<String> = posts
                .iter()
                .map(|p| {
                    format!(
                        "<li>{} – <a href=\"{}\">{}</a> ({})</li>",
                        p.created_at.format("%Y-%m-%d"),
                        escape_html(&href(p)),
                        escape_html(&p.title),
                        escape_html(&p.zone_name)
                    )
                })
                .collect();
            format!("<h2>{month}</h2>\n<ul>\n{}\n</ul>", items.join("\n"))
        })
        .collect();

    format!("<h1>Weather Blog Archive</h1>\n{}", sections.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn post(title: &str) -> GeneratedPost {
        GeneratedPost {
            title: title.to_string(),
            meta_description: "Snow & ice \"today\"".to_string(),
            content_html: "<h1>Snow</h1><p>Gusty wind and freezing rain.</p>".to_string(),
            labels: vec![],
        }
    }

    fn at(day: u32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 9, 30, 0).unwrap()
    }

    #[rstest]
    #[case("Arctic Blast: Snow & Ice Hit the Northeast!", "arctic-blast-snow-ice-hit-the-northeast")]
    #[case("  Multiple   spaces\there ", "multiple-spaces-here")]
    #[case("!!!", "post")]
    #[case("already-slugged title", "already-slugged-title")]
    fn test_slugify(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_slug_is_capped() {
        assert_eq!(slugify(&"a".repeat(200)).len(), 80);
    }

    #[test]
    fn test_auto_generate_tags() {
        let tags = auto_generate_tags("Storm Watch", "<p>Heavy snow and gusts; price notice</p>", "Eastern Zone");
        assert!(tags.contains(&"Eastern Zone".to_string()));
        assert!(tags.contains(&"Eastern US".to_string()));
        assert!(tags.contains(&"Storms".to_string()));
        assert!(tags.contains(&"Snow".to_string()));
        assert!(tags.contains(&"High Winds".to_string()));
        assert!(tags.contains(&"USA Weather".to_string()));
        assert!(tags.contains(&"Weather Forecast".to_string()));
        assert!(!tags.contains(&"Ice".to_string()));

        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_persist_writes_post_index_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LocalArchive::new(dir.path(), Some("https://weather.example.com/".to_string()));

        let meta = archive.persist(&post("Snow Day"), "Eastern Zone", at(5, 1)).unwrap();
        assert_eq!(meta.id, "2025-01-05-snow-day");
        assert_eq!(meta.filename, "2025-01-05-snow-day.html");
        assert_eq!(meta.category, "Eastern Zone");

        let html = std::fs::read_to_string(dir.path().join(&meta.filename)).unwrap();
        assert!(html.contains("<title>Snow Day</title>"));
        assert!(html.contains("content=\"Snow &amp; ice &quot;today&quot;\""));

        for page in ["index.html", "archive.html", "category-eastern-zone.html", "sitemap.xml"] {
            assert!(dir.path().join(page).exists(), "{page} missing");
        }

        let sitemap = std::fs::read_to_string(dir.path().join("sitemap.xml")).unwrap();
        assert!(sitemap.starts_with("<?xml"));
        assert!(sitemap.contains("xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\""));
        assert!(sitemap.contains("<loc>https://weather.example.com/snow-day.html</loc>"));
        assert!(sitemap.contains("<lastmod>2025-01-05</lastmod>"));
    }

    #[test]
    fn test_persist_upserts_same_day_same_title() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LocalArchive::new(dir.path(), None);

        archive.persist(&post("Snow Day"), "Eastern Zone", at(5, 1)).unwrap();
        archive.persist(&post("Snow Day"), "Eastern Zone", at(5, 1)).unwrap();
        archive.persist(&post("Snow Day"), "Eastern Zone", at(6, 1)).unwrap();

        assert_eq!(archive.load_index().len(), 2);
    }

    #[test]
    fn test_record_url_and_archive_page() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LocalArchive::new(dir.path(), None);

        let jan = archive.persist(&post("Snow Day"), "Eastern Zone", at(5, 1)).unwrap();
        let feb = archive.persist(&post("Thaw"), "Central Zone", at(3, 2)).unwrap();
        archive.persist(&post("Unpublished"), "Western Zone", at(4, 2)).unwrap();

        archive.record_url(&jan.id, "https://blog.example.com/2025/01/snow-day.html").unwrap();
        archive.record_url(&feb.id, "https://blog.example.com/2025/02/thaw.html").unwrap();
        assert!(matches!(
            archive.record_url("missing", "x"),
            Err(ArchiveError::UnknownPost { .. })
        ));

        let page = archive.archive_page_html();
        assert!(page.find("2025-02").unwrap() < page.find("2025-01").unwrap());
        assert!(page.contains("https://blog.example.com/2025/02/thaw.html"));
        assert!(!page.contains("Unpublished"));

        let sitemap = std::fs::read_to_string(dir.path().join("sitemap.xml")).unwrap();
        assert_eq!(sitemap.matches("<url>").count(), 2);
    }

    #[test]
    fn test_corrupt_index_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "{not json").unwrap();
        let archive = LocalArchive::new(dir.path(), None);

        assert!(archive.load_index().is_empty());
        assert_eq!(archive.regenerate().unwrap(), 0);
        let dashboard = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(dashboard.contains("No posts yet."));
    }
}
