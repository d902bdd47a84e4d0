//! Turns a zone forecast bundle into a blog post
//!
//! The bundle is flattened into a compact pipe-delimited digest, sent as a
//! single structured-output generation call wrapped in retry with backoff,
//! and the returned JSON is validated before the image and disclaimer
//! markers are replaced with real HTML.

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::gemini::{GenerationError, GenerationRequest, TextGenerator};
use crate::html;
use crate::models::{ForecastResult, GeneratedPost, ZoneForecastBundle};
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};

pub const IMAGE_MARKER: &str = "[[IMAGE_TAG_HERE]]";
pub const DISCLAIMER_MARKER: &str = "[[DISCLAIMER_HERE]]";

const MAX_CITIES: usize = 15;
const MAX_ALERTS_PER_CITY: usize = 2;
/// Roughly now and twelve periods later
const KEY_PERIOD_INDICES: [usize; 2] = [0, 12];

const SYSTEM_INSTRUCTION: &str = "You are a professional weather journalist writing \
SEO-optimized forecast articles for a US audience. Write a detailed, engaging and useful \
article based only on the provided data. Use clean HTML (<h1>, <h2>, <p>, <ul>, <li>, \
<strong>, <em>) with a single <h1> and several <h2> sections. Use US English. Never mention \
how the article was produced.";

/// Fragments substituted for the markers in generated content
#[derive(Debug, Clone, PartialEq)]
pub struct PostDecorations {
    pub image_html: String,
    pub disclaimer_html: String,
}

impl PostDecorations {
    #[must_use]
    pub fn for_zone(zone_name: &str) -> Self {
        Self {
            image_html: html::image_tag(zone_name),
            disclaimer_html: html::disclaimer_block().to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    /// Retry budget spent on transient failures
    #[error("generation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    /// The provider failed in a way retrying cannot fix
    #[error("generation rejected: {source}")]
    Rejected {
        #[source]
        source: GenerationError,
    },

    /// Output did not satisfy the post contract
    #[error("generated post is malformed: {reason}")]
    Malformed { reason: String },
}

/// Strip delimiter characters the digest format relies on
fn clean(text: &str) -> String {
    text.replace(['|', '\n', '\r'], " ").trim().to_string()
}

fn city_line(result: &ForecastResult) -> String {
    let mut parts = vec![clean(&result.location_name)];

    let now = result.periods.first();
    parts.push(format!(
        "now={}",
        now.map_or_else(|| "N/A".to_string(), |p| p.format_temperature())
    ));
    parts.push(format!(
        "desc={}",
        now.map_or_else(|| "N/A".to_string(), |p| clean(&p.short_text))
    ));
    parts.push(format!(
        "wind={}",
        now.and_then(|p| p.wind_speed.as_deref())
            .map_or_else(|| "N/A".to_string(), clean)
    ));

    parts.push(format!("alerts={}", result.alerts.len()));
    if !result.alerts.is_empty() {
        let heads: Vec<String> = result
            .alerts
            .iter()
            .take(MAX_ALERTS_PER_CITY)
            .map(|a| clean(a.summary()))
            .collect();
        parts.push(format!("alert_heads={}", heads.join(";")));
    }

    let points: Vec<String> = KEY_PERIOD_INDICES
        .iter()
        .filter_map(|&i| result.periods.get(i))
        .map(|p| {
            format!(
                "{}|{}|{}|{}",
                p.start_time.to_rfc3339(),
                p.format_temperature(),
                p.wind_speed.as_deref().map_or_else(|| "N/A".to_string(), clean),
                clean(&p.short_text)
            )
        })
        .collect();
    if !points.is_empty() {
        parts.push(format!("points={}", points.join(";;")));
    }

    parts.join("|")
}

/// Compact, token-lean digest of a bundle
///
/// Header line with zone aggregates, a count line, then one line per
/// location (at most fifteen, in catalog order).
#[must_use]
pub fn build_digest(bundle: &ZoneForecastBundle) -> String {
    let firsts: Vec<_> = bundle.results.iter().filter_map(|r| r.periods.first()).collect();

    let temps: Vec<f64> = firsts.iter().filter_map(|p| p.temperature).collect();
    let avg_temp = if temps.is_empty() {
        "N/A".to_string()
    } else {
        let unit = firsts
            .iter()
            .find_map(|p| p.temperature_unit.as_deref())
            .unwrap_or("");
        format!("{:.1}{unit}", temps.iter().sum::<f64>() / temps.len() as f64)
    };

    let max_wind = firsts
        .iter()
        .filter_map(|p| p.wind_speed_value())
        .reduce(f64::max)
        .map_or_else(|| "N/A".to_string(), |w| format!("{w:.0}"));

    let primary = bundle
        .results
        .first()
        .map_or("N/A", |r| r.location_name.as_str());

    let selected: Vec<&ForecastResult> = bundle.results.iter().take(MAX_CITIES).collect();

    let mut lines = vec![
        format!(
            "ZONE={}|PRIMARY={}|AVG_TEMP={avg_temp}|MAX_WIND={max_wind}|TOTAL_ALERTS={}|COVERAGE={}/{}",
            clean(&bundle.zone.id),
            clean(primary),
            bundle.total_alerts(),
            bundle.results.len(),
            bundle.zone.locations.len()
        ),
        format!("REPRESENTATIVE_COUNT={}", selected.len()),
    ];
    lines.extend(selected.into_iter().map(city_line));
    lines.join("\n")
}

#[must_use]
pub fn build_prompt(bundle: &ZoneForecastBundle) -> String {
    let zone = &bundle.zone.name;
    format!(
        "WEATHER ZONE DATA (COMPACT):\n{digest}\n\n\
         ZONE NAME: {zone}\n\n\
         TASK: Using only the data above, write an HTML weather blog post for the '{zone}' region.\n\n\
         CONSTRAINTS:\n\
         - Use a single <h1> title and several <h2> sections such as current conditions, \
         the outlook, advisories and preparedness tips.\n\
         - Insert the literal marker {IMAGE_MARKER} after the <h1> or the first paragraph.\n\
         - Insert the literal marker {DISCLAIMER_MARKER} at the very end of the content.\n\
         - Provide an SEO 'title' (max 70 characters) and 'meta_description' (max 160 characters).\n\
         - Provide up to five short 'labels' for the post.\n\
         - Return only a JSON object with 'title', 'meta_description', 'content_html' and 'labels'.",
        digest = build_digest(bundle),
    )
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": {
                "type": "STRING",
                "description": "SEO-optimized post title, at most 70 characters."
            },
            "meta_description": {
                "type": "STRING",
                "description": "Search engine summary, at most 160 characters."
            },
            "content_html": {
                "type": "STRING",
                "description": "Full post body as a single HTML string including both markers."
            },
            "labels": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["title", "meta_description", "content_html", "labels"]
    })
}

#[derive(Debug, Deserialize)]
struct RawPost {
    title: Option<String>,
    meta_description: Option<String>,
    content_html: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop an optional language tag on the opening fence
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn required(field: &str, value: Option<String>) -> Result<String, SynthesisError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SynthesisError::Malformed {
            reason: format!("missing or empty '{field}'"),
        })
}

/// Validate generator output against the post contract
pub fn parse_post(raw: &str) -> Result<GeneratedPost, SynthesisError> {
    let raw: RawPost =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| SynthesisError::Malformed {
            reason: format!("invalid JSON: {e}"),
        })?;

    Ok(GeneratedPost {
        title: required("title", raw.title)?,
        meta_description: required("meta_description", raw.meta_description)?,
        content_html: required("content_html", raw.content_html)?,
        labels: raw
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
    })
}

/// Replace both markers; a missing marker leaves the content unchanged
#[must_use]
pub fn substitute_markers(content_html: &str, decorations: &PostDecorations) -> String {
    content_html
        .replace(IMAGE_MARKER, &decorations.image_html)
        .replace(DISCLAIMER_MARKER, &decorations.disclaimer_html)
}

/// Generates posts through a [`TextGenerator`]
pub struct ContentSynthesizer<G> {
    generator: G,
    policy: RetryPolicy,
    temperature: f32,
}

impl<G: TextGenerator> ContentSynthesizer<G> {
    pub fn new(generator: G, policy: RetryPolicy, temperature: f32) -> Self {
        Self {
            generator,
            policy,
            temperature,
        }
    }

    #[must_use]
    pub fn generator(&self) -> &G {
        &self.generator
    }

    #[tracing::instrument(skip_all, fields(zone = %bundle.zone.name))]
    pub async fn synthesize(
        &self,
        bundle: &ZoneForecastBundle,
        decorations: &PostDecorations,
    ) -> Result<GeneratedPost, SynthesisError> {
        let request = GenerationRequest {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            prompt: build_prompt(bundle),
            temperature: self.temperature,
            response_schema: response_schema(),
        };

        let raw = retry_with_backoff(&self.policy, GenerationError::is_retryable, |attempt| {
            debug!(attempt, "Requesting post generation");
            self.generator.generate(&request)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => SynthesisError::Exhausted {
                attempts,
                source: last,
            },
            RetryError::Aborted { error, .. } => SynthesisError::Rejected { source: error },
        })?;

        let mut post = parse_post(&raw)?;
        post.content_html = substitute_markers(&post.content_html, decorations);

        info!(title = %post.title, chars = post.content_html.len(), "Post generated");
        Ok(post)
    }
}
