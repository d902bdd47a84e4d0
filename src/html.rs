//! HTML fragments wrapped around generated posts

use chrono::{DateTime, Utc};
use serde_json::json;

/// NWS national watches and warnings map, refreshed by the NWS
pub const ALERT_MAP_URL: &str = "https://www.weather.gov/wwamap/png/US.png";

const PUBLISHER_NAME: &str = "USA Weather Updates";

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Lightweight image tag plus caption for a zone
///
/// Links to a hosted image instead of inlining data so post bodies stay
/// small enough for Blogger.
#[must_use]
pub fn image_tag(zone_name: &str) -> String {
    format!(
        "<img src=\"{ALERT_MAP_URL}\" alt=\"{} Weather Overview\" \
         style=\"max-width:100%;height:auto;border-radius:8px;\" />\n\
         <p><em>Live National Weather Service alert map (updates automatically).</em></p>",
        escape_html(zone_name)
    )
}

#[must_use]
pub fn disclaimer_block() -> &'static str {
    "<div class=\"weather-disclaimer\" style=\"margin-top:24px;padding:12px;border-top:1px solid #ccc;font-size:0.9em;color:#555;\">\n\
     <p><strong>Disclaimer:</strong> This forecast summary is based on National Weather Service data \
     available at the time of writing. Conditions can change quickly. Always follow official NWS \
     forecasts, watches and warnings, and the guidance of local emergency management.</p>\n\
     </div>"
}

/// Blogger label search page for a zone
fn label_url(blog_base_url: Option<&str>, zone: &str) -> String {
    match blog_base_url {
        Some(base) if !base.is_empty() => {
            format!("{base}/search/label/{}", urlencoding::encode(zone))
        }
        _ => "#".to_string(),
    }
}

fn internal_links(current_zone: &str, zones: &[String], blog_base_url: Option<&str>) -> String {
    let items: Vec<String> = zones
        .iter()
        .filter(|z| z.as_str() != current_zone)
        .map(|z| {
            format!(
                "  <li><a href=\"{}\">{} Weather Forecast</a></li>",
                label_url(blog_base_url, z),
                escape_html(z)
            )
        })
        .collect();

    if items.is_empty() {
        return String::new();
    }
    format!(
        "<h2>Explore Other US Regions</h2>\n<ul>\n{}\n</ul>\n",
        items.join("\n")
    )
}

/// Prepend Article JSON-LD and append links to the other zones
#[must_use]
pub fn inject_seo_and_links(
    content_html: &str,
    title: &str,
    zone_name: &str,
    zones: &[String],
    blog_base_url: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let timestamp = now.to_rfc3339();
    let page_id = blog_base_url
        .filter(|b| !b.is_empty())
        .map_or_else(|| "/".to_string(), |b| format!("{b}/"));

    let schema = json!({
        "@context": "https://schema.org",
        "@type": "Article",
        "headline": title,
        "datePublished": timestamp,
        "dateModified": timestamp,
        "author": { "@type": "Organization", "name": PUBLISHER_NAME },
        "publisher": { "@type": "Organization", "name": PUBLISHER_NAME },
        "mainEntityOfPage": { "@type": "WebPage", "@id": page_id },
        "articleSection": zone_name,
        "keywords": [
            "USA weather",
            format!("{zone_name} forecast"),
            "weather alerts",
            "storm updates",
            "today weather",
        ],
    });

    // `</` inside a script block would end it early
    let schema_json = schema.to_string().replace("</", "<\\/");
    let mut html = format!("<script type=\"application/ld+json\">\n{schema_json}\n</script>\n{content_html}");

    let links = internal_links(zone_name, zones, blog_base_url);
    if !links.is_empty() {
        html.push('\n');
        html.push_str(&links);
    }
    html
}
