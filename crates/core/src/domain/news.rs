use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FEED_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub summary: String,
    pub url: String,
    /// ISO-8601.
    #[serde(rename = "publishedAt")]
    pub published_at: String,
    pub source: String,
}

impl NewsArticle {
    /// Dedup identity: lowercased title with whitespace collapsed.
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    pub fn published_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_published_at(&self.published_at)
    }
}

/// Offset-less timestamps are read as UTC; anything unparseable yields `None`.
pub fn parse_published_at(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsFeed {
    pub articles: Vec<NewsArticle>,
    pub fetch_timestamp: DateTime<Utc>,
}

impl NewsFeed {
    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn article(title: &str, published_at: &str) -> NewsArticle {
        NewsArticle {
            title: title.to_string(),
            summary: String::new(),
            url: "https://example.com/a".to_string(),
            published_at: published_at.to_string(),
            source: "example".to_string(),
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        let a = article("  Sensex   Rallies\n500 Points ", "2026-01-27T10:00:00Z");
        assert_eq!(a.normalized_title(), "sensex rallies 500 points");
    }

    #[test]
    fn parses_common_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).unwrap();
        assert_eq!(
            article("a", "2026-01-27T10:00:00Z").published_at_utc(),
            Some(expected)
        );
        assert_eq!(
            article("a", "2026-01-27T15:30:00+05:30").published_at_utc(),
            Some(expected)
        );
        assert_eq!(
            article("a", "2026-01-27T10:00:00.000000").published_at_utc(),
            Some(expected)
        );
        assert_eq!(article("a", "yesterday").published_at_utc(), None);
    }

    #[test]
    fn serializes_published_at_in_camel_case() {
        let v = serde_json::to_value(article("a", "2026-01-27T10:00:00Z")).unwrap();
        assert_eq!(v["publishedAt"], json!("2026-01-27T10:00:00Z"));
        assert!(v.get("published_at").is_none());
    }
}
