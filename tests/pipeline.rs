//! End-to-end pipeline runs against in-memory weather, generation and blog services

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use serde_json::json;
use tempfile::TempDir;

use zonecast::archive::LocalArchive;
use zonecast::config::{PublishingConfig, WeatherConfig};
use zonecast::fetcher::ForecastFetcher;
use zonecast::gemini::{GenerationError, GenerationRequest, TextGenerator};
use zonecast::models::{Addressing, Alert, Coordinates, GridRef, Location, Period, RemotePost, Zone};
use zonecast::nws::{ForecastKind, ProviderError, WeatherProvider};
use zonecast::pipeline::{Pipeline, PipelineSettings, RunOptions, Stage};
use zonecast::publisher::{
    BlogPostBody, BloggerApi, PublishAction, PublishError, Publisher, RemotePage, ResourceKind,
};
use zonecast::retry::RetryPolicy;
use zonecast::rotation::{FileRotationStore, Rotation};
use zonecast::synthesizer::{ContentSynthesizer, DISCLAIMER_MARKER, IMAGE_MARKER};
use zonecast::zones::ZoneCatalog;

#[derive(Clone, Copy)]
enum Office {
    Healthy,
    NoHourly,
    Down,
}

#[derive(Default)]
struct FakeWeather {
    offices: HashMap<String, Office>,
    forecast_calls: Cell<u32>,
}

impl FakeWeather {
    fn with(offices: &[(&str, Office)]) -> Self {
        Self {
            offices: offices.iter().map(|(o, b)| (o.to_string(), *b)).collect(),
            ..Self::default()
        }
    }
}

fn period(temperature: f64) -> Period {
    Period {
        start_time: DateTime::parse_from_rfc3339("2025-01-15T06:00:00-05:00").unwrap(),
        temperature: Some(temperature),
        temperature_unit: Some("F".to_string()),
        wind_speed: Some("15 mph".to_string()),
        short_text: "Light Snow".to_string(),
    }
}

impl WeatherProvider for FakeWeather {
    async fn resolve_grid(&self, _coordinates: Coordinates) -> Result<GridRef, ProviderError> {
        Err(ProviderError::Status {
            status: 500,
            url: "points".to_string(),
        })
    }

    async fn forecast(&self, grid: &GridRef, kind: ForecastKind) -> Result<Vec<Period>, ProviderError> {
        self.forecast_calls.set(self.forecast_calls.get() + 1);
        match (self.offices.get(&grid.office).copied().unwrap_or(Office::Healthy), kind) {
            (Office::Healthy, _) => Ok(vec![period(30.0)]),
            (Office::NoHourly, ForecastKind::Hourly) => Err(ProviderError::NotFound {
                url: "forecast/hourly".to_string(),
            }),
            (Office::NoHourly, ForecastKind::Daily) => Ok(vec![period(34.0)]),
            (Office::Down, _) => Err(ProviderError::Status {
                status: 503,
                url: "forecast".to_string(),
            }),
        }
    }

    async fn active_alerts(&self, _coordinates: Coordinates) -> Result<Vec<Alert>, ProviderError> {
        Ok(vec![Alert {
            event: "Winter Weather Advisory".to_string(),
            headline: None,
            severity: Some("Moderate".to_string()),
        }])
    }
}

#[derive(Default)]
struct RecordingGenerator {
    prompts: RefCell<Vec<String>>,
    /// Calls answered with a 429 before the first success
    rate_limited: Cell<u32>,
}

impl TextGenerator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        if self.rate_limited.get() > 0 {
            self.rate_limited.set(self.rate_limited.get() - 1);
            return Err(GenerationError::RateLimited);
        }
        Ok(json!({
            "title": "Winter Weather Advisory for the Eastern Zone",
            "meta_description": "Light snow and cold temperatures across the Northeast.",
            "content_html": format!(
                "<h1>Eastern Zone</h1>{IMAGE_MARKER}<h2>Outlook</h2><p>Light snow with a winter advisory.</p>{DISCLAIMER_MARKER}"
            ),
            "labels": ["Eastern Zone", "Snow"]
        })
        .to_string())
    }
}

#[derive(Default)]
struct MemoryBlog {
    posts: RefCell<Vec<RemotePost>>,
    pages: RefCell<Vec<RemotePost>>,
    bodies: RefCell<Vec<BlogPostBody>>,
}

impl MemoryBlog {
    fn store(&self, kind: ResourceKind) -> &RefCell<Vec<RemotePost>> {
        match kind {
            ResourceKind::Post => &self.posts,
            ResourceKind::Page => &self.pages,
        }
    }
}

impl BloggerApi for MemoryBlog {
    async fn authenticate(&self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        _page_size: u32,
        _page_token: Option<&str>,
    ) -> Result<RemotePage, PublishError> {
        Ok(RemotePage {
            items: self.store(kind).borrow().clone(),
            next_page_token: None,
        })
    }

    async fn insert(
        &self,
        kind: ResourceKind,
        body: &BlogPostBody,
        _is_draft: bool,
    ) -> Result<RemotePost, PublishError> {
        self.bodies.borrow_mut().push(body.clone());
        let mut store = self.store(kind).borrow_mut();
        let post = RemotePost {
            remote_id: format!("{}", store.len() + 1),
            title: body.title.clone(),
            url: format!("https://zonecast.blogspot.com/{}.html", store.len() + 1),
        };
        store.push(post.clone());
        Ok(post)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        body: &BlogPostBody,
    ) -> Result<RemotePost, PublishError> {
        self.bodies.borrow_mut().push(body.clone());
        let store = self.store(kind).borrow();
        store
            .iter()
            .find(|p| p.remote_id == remote_id)
            .cloned()
            .ok_or_else(|| PublishError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })
    }
}

fn city(name: &str, office: &str) -> Location {
    Location::new(
        name,
        Addressing::Full {
            coordinates: Coordinates::new(42.0, -72.0),
            grid: GridRef::new(office, 10, 10),
        },
    )
}

fn catalog() -> ZoneCatalog {
    ZoneCatalog::new(vec![
        Zone {
            name: "Eastern Zone".to_string(),
            id: "eastern".to_string(),
            locations: vec![
                city("Boston, MA", "BOX"),
                city("Buffalo, NY", "BUF"),
                city("Portland, ME", "GYX"),
            ],
        },
        Zone {
            name: "Western Zone".to_string(),
            id: "western".to_string(),
            locations: vec![city("Seattle, WA", "SEW")],
        },
    ])
    .unwrap()
}

type TestPipeline = Pipeline<FakeWeather, RecordingGenerator, MemoryBlog>;

fn build(dir: &Path, weather: FakeWeather) -> TestPipeline {
    let catalog = catalog();
    let rotation = Rotation::new(
        Box::new(FileRotationStore::new(dir.join("last_zone.txt"))),
        catalog.rotation_order(),
    )
    .unwrap();

    Pipeline::new(
        catalog,
        ForecastFetcher::new(weather, &WeatherConfig::default()),
        ContentSynthesizer::new(
            RecordingGenerator::default(),
            RetryPolicy::new(3, Duration::from_secs(5), Duration::ZERO),
            0.6,
        ),
        Publisher::new(MemoryBlog::default(), &PublishingConfig::default()),
        LocalArchive::new(dir.join("output_posts"), Some("https://zonecast.blogspot.com".to_string())),
        rotation,
        PipelineSettings {
            publish: true,
            posts_per_run: 1,
            blog_base_url: Some("https://zonecast.blogspot.com".to_string()),
            archive_page_title: Some("Weather Blog Archive".to_string()),
        },
    )
}

fn prompts(pipeline: &TestPipeline) -> Vec<String> {
    pipeline.synthesizer().generator().prompts.borrow().clone()
}

fn stored_zone(dir: &TempDir) -> Option<String> {
    std::fs::read_to_string(dir.path().join("last_zone.txt"))
        .ok()
        .map(|s| s.trim().to_string())
}

#[tokio::test(start_paused = true)]
async fn test_partial_zone_is_published_after_rate_limit() {
    let dir = tempfile::tempdir().unwrap();
    let weather = FakeWeather::with(&[("GYX", Office::NoHourly), ("BUF", Office::Down)]);
    let pipeline = build(dir.path(), weather);
    pipeline.synthesizer().generator().rate_limited.set(1);

    let started = tokio::time::Instant::now();
    let report = pipeline.run(&RunOptions::default()).await;
    assert_eq!(report.exit_code(), 0);
    assert!(started.elapsed() >= Duration::from_secs(5));

    let outcome = &report.completed[0];
    assert_eq!(outcome.zone, "Eastern Zone");
    assert_eq!(outcome.published.as_ref().unwrap().action, PublishAction::Inserted);

    // Boston and Portland made it, Buffalo did not; the 429 was retried with the same prompt
    let prompts = prompts(&pipeline);
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], prompts[1]);
    assert!(prompts[1].contains("COVERAGE=2/3"));
    assert!(prompts[1].contains("ZONE NAME: Eastern Zone"));
    // hourly for all three plus one daily fallback for Portland
    assert_eq!(pipeline.fetcher().provider().forecast_calls.get(), 4);

    let content = &outcome.post.content_html;
    assert!(content.contains("application/ld+json"));
    assert!(content.contains("Explore Other US Regions"));
    assert!(!content.contains(IMAGE_MARKER));
    assert!(!content.contains(DISCLAIMER_MARKER));

    let index = pipeline.archive().load_index();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].url.as_deref(), Some("https://zonecast.blogspot.com/1.html"));
    let sitemap = std::fs::read_to_string(dir.path().join("output_posts/sitemap.xml")).unwrap();
    assert!(sitemap.contains("https://zonecast.blogspot.com/1.html"));

    assert_eq!(stored_zone(&dir).as_deref(), Some("Eastern Zone"));
}

#[tokio::test]
async fn test_republishing_same_title_updates_instead_of_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = build(dir.path(), FakeWeather::default());

    let options = RunOptions {
        zone: Some("Eastern Zone".to_string()),
        ..RunOptions::default()
    };
    let first = pipeline.run(&options).await;
    let second = pipeline.run(&options).await;

    assert_eq!(first.completed[0].published.as_ref().unwrap().action, PublishAction::Inserted);
    assert_eq!(second.completed[0].published.as_ref().unwrap().action, PublishAction::Updated);

    let blog = pipeline.publisher().api();
    assert_eq!(blog.posts.borrow().len(), 1);
    assert_eq!(blog.pages.borrow().len(), 1);

    let labels = &blog.bodies.borrow()[0].labels;
    assert_eq!(labels.iter().filter(|l| *l == "Eastern Zone").count(), 1);
    assert!(labels.iter().any(|l| l == "Snow"));
}

#[tokio::test]
async fn test_zone_with_no_data_aborts_before_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let weather = FakeWeather::with(&[
        ("BOX", Office::Down),
        ("BUF", Office::Down),
        ("GYX", Office::Down),
    ]);
    let pipeline = build(dir.path(), weather);

    let report = pipeline.run(&RunOptions::default()).await;
    let failure = report.failure.as_ref().unwrap();

    assert_eq!(report.exit_code(), 1);
    assert_eq!(failure.stage, Stage::Fetch);
    assert_eq!(failure.zone, "Eastern Zone");
    assert_eq!(pipeline.fetcher().provider().forecast_calls.get(), 3);
    assert!(prompts(&pipeline).is_empty());
    assert!(pipeline.publisher().api().posts.borrow().is_empty());
    assert_eq!(stored_zone(&dir), None);
}
