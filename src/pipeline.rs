//! One zonecast run: rotation, fetch, synthesis, archive and publish
//!
//! Collaborators are built once and handed to [`Pipeline::new`]; nothing is
//! looked up globally. A zone is recorded as completed in the rotation state
//! only after its publish succeeded, so a failed or dry-run zone comes up
//! again on the next run.

use std::fmt;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ZonecastError;
use crate::archive::{LocalArchive, auto_generate_tags};
use crate::config::{StateBackend, ZonecastConfig};
use crate::fetcher::ForecastFetcher;
use crate::gemini::{GeminiClient, TextGenerator};
use crate::html::inject_seo_and_links;
use crate::models::{GeneratedPost, PostMeta};
use crate::nws::{NwsClient, WeatherProvider};
use crate::publisher::{
    BlogPostBody, BloggerApi, BloggerClient, OAuthTokenProvider, PublishReceipt, Publisher,
    ResourceKind,
};
use crate::rotation::{
    FileRotationStore, KeyspaceRotationStore, Rotation, RotationStore, successor,
};
use crate::synthesizer::{ContentSynthesizer, PostDecorations};
use crate::zones::ZoneCatalog;

/// Pipeline step a zone failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Catalog,
    Fetch,
    Synthesis,
    Archive,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Catalog => "catalog",
            Stage::Fetch => "fetch",
            Stage::Synthesis => "synthesis",
            Stage::Archive => "archive",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("{zone} failed during {stage}: {error}")]
pub struct ZoneFailure {
    pub zone: String,
    pub stage: Stage,
    #[source]
    pub error: ZonecastError,
}

impl ZoneFailure {
    fn new(zone: &str, stage: Stage, error: impl Into<ZonecastError>) -> Self {
        Self {
            zone: zone.to_string(),
            stage,
            error: error.into(),
        }
    }
}

/// What a successful zone produced
#[derive(Debug, Clone)]
pub struct ZoneOutcome {
    pub zone: String,
    pub post: GeneratedPost,
    /// Index record, absent when the local write failed
    pub archived: Option<PostMeta>,
    /// Remote result, absent in dry-run mode
    pub published: Option<PublishReceipt>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip remote publishing regardless of configuration
    pub dry_run: bool,
    /// Process this zone once instead of asking the rotation
    pub zone: Option<String>,
    /// Overrides `run.posts_per_run`
    pub posts: Option<u32>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<ZoneOutcome>,
    pub failure: Option<ZoneFailure>,
}

impl RunReport {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(self.failure.is_some())
    }
}

/// Run-level switches taken from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub publish: bool,
    pub posts_per_run: u32,
    pub blog_base_url: Option<String>,
    pub archive_page_title: Option<String>,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &ZonecastConfig) -> Self {
        Self {
            publish: config.publishing.publish,
            posts_per_run: config.run.posts_per_run,
            blog_base_url: config.publishing.blog_base_url.clone(),
            archive_page_title: config
                .publishing
                .archive_page_title
                .clone()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}

pub struct Pipeline<P, G, B> {
    catalog: ZoneCatalog,
    fetcher: ForecastFetcher<P>,
    synthesizer: ContentSynthesizer<G>,
    publisher: Publisher<B>,
    archive: LocalArchive,
    rotation: Rotation,
    settings: PipelineSettings,
}

/// Pipeline wired to the real NWS, Gemini and Blogger services
pub type LivePipeline = Pipeline<NwsClient, GeminiClient, BloggerClient<OAuthTokenProvider>>;

/// Rotation store selected by `run.state_backend`
pub fn open_rotation_store(config: &ZonecastConfig) -> anyhow::Result<Box<dyn RotationStore>> {
    Ok(match config.run.state_backend {
        StateBackend::File => Box::new(FileRotationStore::new(&config.run.state_file)),
        StateBackend::Keyspace => Box::new(
            KeyspaceRotationStore::open(&config.run.keyspace_path).with_context(|| {
                format!(
                    "Failed to open rotation keyspace {}",
                    config.run.keyspace_path.display()
                )
            })?,
        ),
    })
}

/// Zone catalog from `run.zones_file`, or the built-in one
pub fn load_catalog(config: &ZonecastConfig) -> anyhow::Result<ZoneCatalog> {
    match &config.run.zones_file {
        Some(path) => ZoneCatalog::load(path),
        None => Ok(ZoneCatalog::builtin()),
    }
}

impl LivePipeline {
    pub fn from_config(config: &ZonecastConfig) -> anyhow::Result<Self> {
        config.validate_for_run()?;

        let catalog = load_catalog(config)?;
        let rotation = Rotation::new(open_rotation_store(config)?, catalog.rotation_order())?;

        let fetcher = ForecastFetcher::new(NwsClient::new(&config.weather)?, &config.weather);
        let synthesizer = ContentSynthesizer::new(
            GeminiClient::new(&config.generation)?,
            config.generation.retry_policy(),
            config.generation.temperature,
        );

        let secrets = config
            .publishing
            .client_secrets_file
            .as_deref()
            .ok_or_else(|| ZonecastError::config("CLIENT_SECRETS_FILE is not set"))?;
        let tokens = OAuthTokenProvider::from_files(secrets, &config.publishing.token_file)
            .map_err(|e| ZonecastError::config(e.to_string()))?;
        let publisher = Publisher::new(
            BloggerClient::new(&config.publishing, tokens)?,
            &config.publishing,
        );

        let archive = LocalArchive::new(
            &config.archive.output_dir,
            config.publishing.blog_base_url.clone(),
        );

        Ok(Pipeline::new(
            catalog,
            fetcher,
            synthesizer,
            publisher,
            archive,
            rotation,
            PipelineSettings::from_config(config),
        ))
    }
}

impl<P, G, B> Pipeline<P, G, B>
where
    P: WeatherProvider,
    G: TextGenerator,
    B: BloggerApi,
{
    pub fn new(
        catalog: ZoneCatalog,
        fetcher: ForecastFetcher<P>,
        synthesizer: ContentSynthesizer<G>,
        publisher: Publisher<B>,
        archive: LocalArchive,
        rotation: Rotation,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            synthesizer,
            publisher,
            archive,
            rotation,
            settings,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &ZoneCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn fetcher(&self) -> &ForecastFetcher<P> {
        &self.fetcher
    }

    #[must_use]
    pub fn synthesizer(&self) -> &ContentSynthesizer<G> {
        &self.synthesizer
    }

    #[must_use]
    pub fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    #[must_use]
    pub fn archive(&self) -> &LocalArchive {
        &self.archive
    }

    #[must_use]
    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    /// Process up to `posts_per_run` zones, stopping at the first failure
    pub async fn run(&self, options: &RunOptions) -> RunReport {
        let publish = self.settings.publish && !options.dry_run;
        let count = match &options.zone {
            Some(_) => 1,
            None => options.posts.unwrap_or(self.settings.posts_per_run).max(1),
        };
        let mut report = RunReport::default();
        // dry runs leave the stored state alone, so later zones follow the previous one in memory
        let mut previous: Option<String> = None;

        for _ in 0..count {
            let zone = match (&options.zone, &previous) {
                (Some(zone), _) => zone.clone(),
                (None, Some(last)) if !publish => successor(self.rotation.order(), Some(last))
                    .unwrap_or(last.as_str())
                    .to_string(),
                (None, _) => self.rotation.next_zone().await,
            };

            match self.run_zone(&zone, publish).await {
                Ok(outcome) => {
                    if options.zone.is_none() && outcome.published.is_some() {
                        self.rotation.record_completion(&zone).await;
                    }
                    previous = Some(zone);
                    report.completed.push(outcome);
                }
                Err(failure) => {
                    error!(zone = %failure.zone, stage = %failure.stage, error = %failure.error, "Zone failed");
                    report.failure = Some(failure);
                    break;
                }
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failure.is_some(),
            "Run finished"
        );
        report
    }

    /// Run every stage for one zone; does not touch the rotation state
    #[tracing::instrument(skip(self))]
    pub async fn run_zone(&self, zone_name: &str, publish: bool) -> Result<ZoneOutcome, ZoneFailure> {
        let zone = self
            .catalog
            .zone(zone_name)
            .map_err(|e| ZoneFailure::new(zone_name, Stage::Catalog, e))?;
        info!(zone = %zone.name, locations = zone.locations.len(), "Processing zone");

        let bundle = self
            .fetcher
            .fetch_zone(zone)
            .await
            .map_err(|e| ZoneFailure::new(zone_name, Stage::Fetch, e))?;

        let decorations = PostDecorations::for_zone(&zone.name);
        let mut post = self
            .synthesizer
            .synthesize(&bundle, &decorations)
            .await
            .map_err(|e| ZoneFailure::new(zone_name, Stage::Synthesis, e))?;

        let now = Utc::now();
        post.content_html = inject_seo_and_links(
            &post.content_html,
            &post.title,
            &zone.name,
            &self.catalog.rotation_order(),
            self.settings.blog_base_url.as_deref(),
            now,
        );

        let archived = match self.archive.persist(&post, &zone.name, now) {
            Ok(meta) => Some(meta),
            Err(e) if publish => {
                warn!(zone = %zone.name, error = %e, "Local archive write failed, publishing anyway");
                None
            }
            Err(e) => {
                return Err(ZoneFailure::new(
                    zone_name,
                    Stage::Archive,
                    ZonecastError::general(e.to_string()),
                ));
            }
        };

        if !publish {
            info!(zone = %zone.name, title = %post.title, "Dry run, skipping remote publish");
            return Ok(ZoneOutcome {
                zone: zone.name.clone(),
                post,
                archived,
                published: None,
            });
        }

        let body = BlogPostBody {
            title: post.title.clone(),
            content: post.content_html.clone(),
            labels: merge_labels(&post, &zone.name),
        };
        let receipt = self
            .publisher
            .publish(ResourceKind::Post, &body)
            .await
            .map_err(|e| ZoneFailure::new(zone_name, Stage::Publish, e))?;

        if let Some(meta) = &archived
            && let Err(e) = self.archive.record_url(&meta.id, &receipt.remote.url)
        {
            warn!(id = %meta.id, error = %e, "Failed to record published URL");
        }
        self.refresh_archive_page().await;

        Ok(ZoneOutcome {
            zone: zone.name.clone(),
            post,
            archived,
            published: Some(receipt),
        })
    }

    /// Upsert the auxiliary archive page; failures are only logged
    async fn refresh_archive_page(&self) {
        let Some(title) = &self.settings.archive_page_title else {
            return;
        };
        let body = BlogPostBody {
            title: title.clone(),
            content: self.archive.archive_page_html(),
            labels: Vec::new(),
        };
        if let Err(e) = self.publisher.publish(ResourceKind::Page, &body).await {
            warn!(title = %title, error = %e, "Archive page not updated");
        }
    }
}

/// Generated labels first, then derived tags not already present
fn merge_labels(post: &GeneratedPost, zone_name: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let derived = auto_generate_tags(&post.title, &post.content_html, zone_name);
    for label in post.labels.iter().chain(derived.iter()) {
        let label = label.trim();
        if !label.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            labels.push(label.to_string());
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeatherConfig;
    use crate::gemini::{GenerationError, GenerationRequest};
    use crate::models::{Addressing, Alert, Coordinates, GridRef, Location, Period, Zone};
    use crate::nws::{ForecastKind, ProviderError};
    use crate::publisher::tests::FakeBlog;
    use crate::retry::RetryPolicy;
    use crate::synthesizer::{DISCLAIMER_MARKER, IMAGE_MARKER};
    use chrono::DateTime;
    use serde_json::json;
    use std::cell::Cell;
    use std::time::Duration;
    use tempfile::TempDir;

    struct SunnyProvider;

    impl WeatherProvider for SunnyProvider {
        async fn resolve_grid(&self, _c: Coordinates) -> Result<GridRef, ProviderError> {
            Ok(GridRef::new("BOX", 1, 1))
        }

        async fn forecast(&self, _g: &GridRef, _k: ForecastKind) -> Result<Vec<Period>, ProviderError> {
            Ok(vec![Period {
                start_time: DateTime::parse_from_rfc3339("2025-01-01T12:00:00-05:00").unwrap(),
                temperature: Some(28.0),
                temperature_unit: Some("F".to_string()),
                wind_speed: Some("10 mph".to_string()),
                short_text: "Snow Showers".to_string(),
            }])
        }

        async fn active_alerts(&self, _c: Coordinates) -> Result<Vec<Alert>, ProviderError> {
            Ok(vec![])
        }
    }

    struct FixedGenerator {
        calls: Cell<u32>,
    }

    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _r: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.set(self.calls.get() + 1);
            Ok(json!({
                "title": "Snow Showers Across the Northeast",
                "meta_description": "Cold and snowy.",
                "content_html": format!("<h2>Outlook</h2>{IMAGE_MARKER}<p>Snow.</p>{DISCLAIMER_MARKER}"),
                "labels": ["Eastern Zone", "Winter"]
            })
            .to_string())
        }
    }

    fn catalog() -> ZoneCatalog {
        let zone = |name: &str| Zone {
            name: name.to_string(),
            id: name.to_lowercase().replace(' ', "-"),
            locations: vec![Location::new(
                "Boston, MA",
                Addressing::Full {
                    coordinates: Coordinates::new(42.36, -71.06),
                    grid: GridRef::new("BOX", 71, 90),
                },
            )],
        };
        ZoneCatalog::new(vec![zone("Eastern Zone"), zone("Western Zone")]).unwrap()
    }

    fn pipeline(
        dir: &TempDir,
        blog: FakeBlog,
        publish: bool,
    ) -> Pipeline<SunnyProvider, FixedGenerator, FakeBlog> {
        let catalog = catalog();
        let rotation = Rotation::new(
            Box::new(FileRotationStore::new(dir.path().join("last_zone.txt"))),
            catalog.rotation_order(),
        )
        .unwrap();
        Pipeline::new(
            catalog,
            ForecastFetcher::new(SunnyProvider, &WeatherConfig::default()),
            ContentSynthesizer::new(
                FixedGenerator { calls: Cell::new(0) },
                RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
                0.6,
            ),
            Publisher::new(blog, &crate::config::PublishingConfig::default()),
            LocalArchive::new(dir.path().join("posts"), None),
            rotation,
            PipelineSettings {
                publish,
                posts_per_run: 1,
                blog_base_url: None,
                archive_page_title: Some("Weather Blog Archive".to_string()),
            },
        )
    }

    #[test]
    fn test_merge_labels_dedupes_case_insensitively() {
        let post = GeneratedPost {
            title: "Storm Watch".to_string(),
            meta_description: String::new(),
            content_html: "<p>storm</p>".to_string(),
            labels: vec!["eastern zone".to_string(), "Storm".to_string()],
        };
        let labels = merge_labels(&post, "Eastern Zone");
        assert_eq!(labels[0], "eastern zone");
        assert_eq!(
            labels.iter().filter(|l| l.eq_ignore_ascii_case("eastern zone")).count(),
            1
        );
        assert_eq!(labels.iter().filter(|l| l.eq_ignore_ascii_case("storm")).count(), 1);
    }

    #[tokio::test]
    async fn test_publish_records_url_and_archive_page() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), true);

        let report = pipeline.run(&RunOptions::default()).await;
        assert_eq!(report.exit_code(), 0);
        let outcome = &report.completed[0];
        assert_eq!(outcome.zone, "Eastern Zone");
        assert!(!outcome.post.content_html.contains(IMAGE_MARKER));

        let blog = pipeline.publisher.api();
        assert_eq!(blog.posts.borrow().len(), 1);
        assert_eq!(blog.pages.borrow()[0].title, "Weather Blog Archive");

        let index = pipeline.archive().load_index();
        assert_eq!(index[0].url.as_deref(), Some("https://blog.example.com/1.html"));
        assert_eq!(pipeline.rotation().next_zone().await, "Western Zone");
    }

    #[tokio::test]
    async fn test_dry_run_archives_without_advancing_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), true);

        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let report = pipeline.run(&options).await;

        assert_eq!(report.exit_code(), 0);
        assert!(report.completed[0].published.is_none());
        assert_eq!(pipeline.publisher.api().inserts.get(), 0);
        assert_eq!(pipeline.archive().load_index().len(), 1);
        assert_eq!(pipeline.rotation().next_zone().await, "Eastern Zone");
        assert!(!dir.path().join("last_zone.txt").exists());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_rotation_and_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let blog = FakeBlog {
            fail_insert: true,
            ..FakeBlog::default()
        };
        let pipeline = pipeline(&dir, blog, true);

        let report = pipeline.run(&RunOptions::default()).await;
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Stage::Publish);
        assert_eq!(report.exit_code(), 1);

        assert_eq!(pipeline.archive().load_index().len(), 1);
        assert_eq!(pipeline.rotation().next_zone().await, "Eastern Zone");
    }

    #[tokio::test]
    async fn test_zone_override_leaves_rotation_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), false);

        let options = RunOptions {
            zone: Some("Western Zone".to_string()),
            posts: Some(4),
            ..RunOptions::default()
        };
        let report = pipeline.run(&options).await;
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].zone, "Western Zone");
        assert_eq!(pipeline.rotation().next_zone().await, "Eastern Zone");
    }

    #[tokio::test]
    async fn test_unknown_zone_fails_in_catalog_stage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), false);

        let failure = pipeline.run_zone("Arctic Zone", false).await.unwrap_err();
        assert_eq!(failure.stage, Stage::Catalog);
        assert_eq!(pipeline.synthesizer.generator().calls.get(), 0);
    }

    #[tokio::test]
    async fn test_posts_per_run_processes_consecutive_zones() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), true);

        let options = RunOptions {
            posts: Some(3),
            ..RunOptions::default()
        };
        let report = pipeline.run(&options).await;
        let zones: Vec<&str> = report.completed.iter().map(|o| o.zone.as_str()).collect();
        assert_eq!(zones, ["Eastern Zone", "Western Zone", "Eastern Zone"]);
        assert_eq!(pipeline.rotation().next_zone().await, "Western Zone");
    }

    #[tokio::test]
    async fn test_dry_run_with_several_posts_walks_the_order_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir, FakeBlog::default(), false);

        let options = RunOptions {
            posts: Some(2),
            ..RunOptions::default()
        };
        let report = pipeline.run(&options).await;
        let zones: Vec<&str> = report.completed.iter().map(|o| o.zone.as_str()).collect();
        assert_eq!(zones, ["Eastern Zone", "Western Zone"]);
        assert_eq!(pipeline.rotation().next_zone().await, "Eastern Zone");
    }
}
