use crate::config::Settings;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Floor for the pause between two page requests to the same source.
pub const MIN_REQUEST_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_PAGE_COUNT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    pub selector_rules: ExtractionRules,
}

/// Regular expressions standing in for CSS selectors.
///
/// `article` matches one article block in the page. The others run inside that block:
/// `title` must define a `title` group and may define `url`; `summary` and `published`
/// define groups of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRules {
    pub article: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

fn default_page_count() -> u32 {
    DEFAULT_PAGE_COUNT
}

impl SourceConfig {
    /// Page 1 is the base URL itself; later pages live at `<base_url>/page-N`.
    pub fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            self.base_url.clone()
        } else {
            format!("{}/page-{page}", self.base_url.trim_end_matches('/'))
        }
    }

    pub fn request_delay(&self) -> Duration {
        self.request_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(MIN_REQUEST_DELAY)
            .max(MIN_REQUEST_DELAY)
    }
}

pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "moneycontrol".to_string(),
            base_url: "https://www.moneycontrol.com/news/business/markets".to_string(),
            page_count: 2,
            request_delay_ms: None,
            selector_rules: ExtractionRules {
                article: r#"(?s)<li[^>]*class="clearfix"[^>]*>.*?</li>"#.to_string(),
                title: r#"(?s)<h2[^>]*>\s*<a[^>]*href="(?P<url>[^"]*)"[^>]*>(?P<title>.*?)</a>"#
                    .to_string(),
                summary: Some(r"(?s)<p[^>]*>(?P<summary>.*?)</p>".to_string()),
                published: None,
            },
        },
        SourceConfig {
            name: "economictimes".to_string(),
            base_url: "https://economictimes.indiatimes.com/markets/stocks/news".to_string(),
            page_count: 1,
            request_delay_ms: None,
            selector_rules: ExtractionRules {
                article: r#"(?s)<div[^>]*class="eachStory"[^>]*>.*?</p>"#.to_string(),
                title: r#"(?s)<h3[^>]*>\s*<a[^>]*href="(?P<url>[^"]*)"[^>]*>(?P<title>.*?)</a>"#
                    .to_string(),
                summary: Some(r"(?s)<p[^>]*>(?P<summary>.*?)</p>".to_string()),
                published: Some(r#"<time[^>]*datetime="(?P<published>[^"]+)""#.to_string()),
            },
        },
    ]
}

/// Sources from `NEWS_SOURCES_FILE` (JSON array) when set, the built-in list otherwise.
pub fn load_sources(settings: &Settings) -> anyhow::Result<Vec<SourceConfig>> {
    let Some(path) = settings.news_sources_file.as_deref() else {
        return Ok(default_sources());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read NEWS_SOURCES_FILE {path}"))?;
    let sources = serde_json::from_str::<Vec<SourceConfig>>(&text)
        .with_context(|| format!("NEWS_SOURCES_FILE {path} is not a valid source list"))?;

    for source in &sources {
        anyhow::ensure!(!source.name.trim().is_empty(), "source name must be non-empty");
        anyhow::ensure!(
            source.base_url.starts_with("http://") || source.base_url.starts_with("https://"),
            "source {} base_url must be absolute (got {})",
            source.name,
            source.base_url
        );
    }

    Ok(sources)
}
