pub mod extract;
pub mod fetcher;
pub mod source;

use crate::domain::news::{NewsArticle, NewsFeed};
use crate::news::extract::extract_articles;
use crate::news::fetcher::{HttpPageFetcher, PageFetcher};
use crate::news::source::SourceConfig;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

/// Fans out over the configured sources and merges what comes back into one bounded feed.
#[derive(Clone)]
pub struct NewsAggregator {
    fetcher: Arc<dyn PageFetcher>,
}

impl NewsAggregator {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(HttpPageFetcher::from_env()?)))
    }

    /// Best effort across sources: a failing source contributes nothing and never fails the feed.
    pub async fn fetch_feed(&self, sources: &[SourceConfig], limit: usize) -> NewsFeed {
        let fetch_timestamp = Utc::now();
        let per_source =
            futures::future::join_all(sources.iter().map(|source| self.fetch_source(source)))
                .await;

        let mut candidates = Vec::new();
        for (source, articles) in sources.iter().zip(per_source) {
            tracing::debug!(source = %source.name, count = articles.len(), "news source done");
            candidates.extend(articles);
        }

        let total = candidates.len();
        let articles = merge_feed(candidates, limit);
        tracing::info!(
            sources = sources.len(),
            candidates = total,
            kept = articles.len(),
            "news feed aggregated"
        );

        NewsFeed {
            articles,
            fetch_timestamp,
        }
    }

    async fn fetch_source(&self, source: &SourceConfig) -> Vec<NewsArticle> {
        let rules = match source.selector_rules.compile() {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(source = %source.name, error = %format!("{err:#}"), "invalid extraction rules; skipping source");
                return Vec::new();
            }
        };

        let delay = source.request_delay();
        let pages = source.page_count.max(1);
        let mut out = Vec::new();
        let mut failed_pages: u32 = 0;

        for page in 1..=pages {
            if page > 1 {
                tokio::time::sleep(delay).await;
            }

            let url = source.page_url(page);
            match self.fetcher.fetch_page(&url).await {
                Ok(html) => out.extend(extract_articles(&html, &rules, source, Utc::now())),
                Err(err) => {
                    failed_pages += 1;
                    tracing::warn!(
                        source = %source.name,
                        page,
                        url = %url,
                        error = %format!("{err:#}"),
                        "news page fetch failed; skipping page"
                    );
                }
            }
        }

        if failed_pages == pages {
            tracing::warn!(source = %source.name, "all pages failed; source contributes no articles");
        }
        out
    }
}

/// Newest first (unparseable timestamps last), one entry per normalized title, at most `limit`.
///
/// The sort is stable and runs before dedup, so among duplicates the most recent is kept and
/// equal timestamps keep their arrival order.
pub fn merge_feed(mut articles: Vec<NewsArticle>, limit: usize) -> Vec<NewsArticle> {
    articles.sort_by_cached_key(|a| Reverse(a.published_at_utc()));

    let mut seen = HashSet::new();
    articles.retain(|a| seen.insert(a.normalized_title()));
    articles.truncate(limit);
    articles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::news::DEFAULT_FEED_LIMIT;
    use crate::news::source::ExtractionRules;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn article(title: &str, published_at: &str, source: &str) -> NewsArticle {
        NewsArticle {
            title: title.to_string(),
            summary: String::new(),
            url: format!("https://{source}.example.com/{}", title.len()),
            published_at: published_at.to_string(),
            source: source.to_string(),
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, String>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeFetcher {
        fn with_page(mut self, url: &str, items: &[(&str, &str)]) -> Self {
            let html = items
                .iter()
                .map(|(title, ts)| {
                    format!(r#"<article><a href="/{title}">{title}</a><time datetime="{ts}"></time></article>"#)
                })
                .collect::<String>();
            self.pages.insert(url.to_string(), html);
            self
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_page(&self, url: &str) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("news page HTTP 503 Service Unavailable: {url}"))
        }
    }

    fn source(name: &str, page_count: u32) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            base_url: format!("https://{name}.example.com/markets"),
            page_count,
            request_delay_ms: None,
            selector_rules: ExtractionRules {
                article: r"(?s)<article>.*?</article>".to_string(),
                title: r#"<a href="(?P<url>[^"]*)">(?P<title>.*?)</a>"#.to_string(),
                summary: None,
                published: Some(r#"<time datetime="(?P<published>[^"]+)""#.to_string()),
            },
        }
    }

    #[test]
    fn duplicate_titles_keep_the_most_recent() {
        let merged = merge_feed(
            vec![
                article("Sensex hits record", "2026-01-27T08:00:00Z", "a"),
                article("Gold slips", "2026-01-27T09:00:00Z", "a"),
                article("  SENSEX hits   record ", "2026-01-27T10:00:00Z", "b"),
            ],
            DEFAULT_FEED_LIMIT,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source, "b");
        assert_eq!(merged[0].published_at, "2026-01-27T10:00:00Z");
        assert_eq!(merged[1].title, "Gold slips");
    }

    #[test]
    fn feed_is_bounded_and_sorted_newest_first() {
        let articles = (0..30)
            .map(|i| {
                article(
                    &format!("Story {i}"),
                    &format!("2026-01-{:02}T12:00:00Z", (i % 28) + 1),
                    "wire",
                )
            })
            .collect::<Vec<_>>();

        let merged = merge_feed(articles, DEFAULT_FEED_LIMIT);
        assert_eq!(merged.len(), 20);
        for pair in merged.windows(2) {
            assert!(pair[0].published_at_utc() >= pair[1].published_at_utc());
        }
    }

    #[test]
    fn unparseable_timestamps_sort_last() {
        let merged = merge_feed(
            vec![
                article("Undated", "sometime", "a"),
                article("Older", "2026-01-01T00:00:00Z", "a"),
                article("Newer", "2026-01-02T00:00:00Z", "a"),
            ],
            10,
        );
        let titles = merged.iter().map(|a| a.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Newer", "Older", "Undated"]);
    }

    #[tokio::test]
    async fn failing_source_does_not_affect_others() {
        let fetcher = FakeFetcher::default().with_page(
            "https://good.example.com/markets",
            &[("Rupee firms", "2026-01-27T10:00:00Z")],
        );
        let aggregator = NewsAggregator::new(Arc::new(fetcher));

        let mut broken_rules = source("badrules", 1);
        broken_rules.selector_rules.title = "(unclosed".to_string();

        let feed = aggregator
            .fetch_feed(
                &[source("down", 1), source("good", 1), broken_rules],
                DEFAULT_FEED_LIMIT,
            )
            .await;

        assert_eq!(feed.len(), 1);
        assert_eq!(feed.articles[0].title, "Rupee firms");
        assert_eq!(feed.articles[0].url, "https://good.example.com/Rupee%20firms");
        assert_eq!(feed.articles[0].source, "good");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_is_skipped_and_later_pages_still_fetched() {
        let fetcher = FakeFetcher::default().with_page(
            "https://flaky.example.com/markets/page-2",
            &[("Bond yields ease", "2026-01-27T07:00:00Z")],
        );
        let aggregator = NewsAggregator::new(Arc::new(fetcher));

        let feed = aggregator
            .fetch_feed(&[source("flaky", 2)], DEFAULT_FEED_LIMIT)
            .await;

        assert_eq!(feed.len(), 1);
        assert_eq!(feed.articles[0].title, "Bond yields ease");
    }

    #[tokio::test(start_paused = true)]
    async fn sources_run_concurrently_with_per_source_delay() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("https://a.example.com/markets", &[("A1", "2026-01-27T10:00:00Z")])
                .with_page("https://a.example.com/markets/page-2", &[("A2", "2026-01-27T09:00:00Z")])
                .with_page("https://b.example.com/markets", &[("B1", "2026-01-27T11:00:00Z")])
                .with_page("https://b.example.com/markets/page-2", &[("B2", "2026-01-27T08:00:00Z")]),
        );
        let aggregator = NewsAggregator::new(fetcher.clone());

        let started = Instant::now();
        let feed = aggregator
            .fetch_feed(&[source("a", 2), source("b", 2)], DEFAULT_FEED_LIMIT)
            .await;
        let elapsed = started.elapsed();

        let titles = feed.articles.iter().map(|a| a.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["B1", "A1", "A2", "B2"]);

        // Sequential sources would need two full delays.
        assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 4);
        for name in ["a", "b"] {
            let first = format!("https://{name}.example.com/markets");
            let second = format!("{first}/page-2");
            let at = |url: &str| calls.iter().find(|(u, _)| u == url).map(|(_, t)| *t).unwrap();
            assert!(at(&second).duration_since(at(&first)) >= Duration::from_secs(1));
        }
    }
}
