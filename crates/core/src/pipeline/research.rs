use crate::domain::contract::ResearchFindings;
use crate::domain::news::NewsArticle;
use crate::news::source::SourceConfig;
use crate::news::NewsAggregator;
use std::collections::HashSet;

const TOP_ARTICLES: usize = 5;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "should", "what", "which", "when",
    "how", "can", "does", "with", "into", "from", "that", "this", "there", "their", "about",
    "invest", "investing", "would", "could", "will",
];

/// Research capability used by the chat graph's first stage.
#[async_trait::async_trait]
pub trait ResearchTool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn research(&self, query: &str) -> anyhow::Result<ResearchFindings>;
}

/// Searches the aggregated news feed for articles sharing keywords with the query.
#[derive(Clone)]
pub struct NewsResearchTool {
    news: NewsAggregator,
    sources: Vec<SourceConfig>,
    feed_limit: usize,
}

impl NewsResearchTool {
    pub fn new(news: NewsAggregator, sources: Vec<SourceConfig>, feed_limit: usize) -> Self {
        Self {
            news,
            sources,
            feed_limit,
        }
    }
}

#[async_trait::async_trait]
impl ResearchTool for NewsResearchTool {
    fn name(&self) -> &'static str {
        "financial_research"
    }

    async fn research(&self, query: &str) -> anyhow::Result<ResearchFindings> {
        let feed = self.news.fetch_feed(&self.sources, self.feed_limit).await;
        let relevant = rank_articles(query, &feed.articles, TOP_ARTICLES);
        tracing::debug!(
            feed = feed.len(),
            relevant = relevant.len(),
            "news research done"
        );
        Ok(findings_from_articles(&relevant))
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Articles sharing at least one keyword with `query`, best overlap first; ties keep feed order.
pub fn rank_articles<'a>(query: &str, articles: &'a [NewsArticle], top: usize) -> Vec<&'a NewsArticle> {
    let wanted = keywords(query);
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut scored = articles
        .iter()
        .filter_map(|article| {
            let text = format!("{} {}", article.title, article.summary);
            let score = keywords(&text).intersection(&wanted).count();
            (score > 0).then_some((score, article))
        })
        .collect::<Vec<_>>();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(top).map(|(_, a)| a).collect()
}

pub fn findings_from_articles(articles: &[&NewsArticle]) -> ResearchFindings {
    let mut findings = ResearchFindings::default();
    for article in articles {
        if !article.url.is_empty() && !findings.sources.contains(&article.url) {
            findings.sources.push(article.url.clone());
        }
        findings
            .key_findings
            .push(format!("{} ({})", article.title, article.source));
        if !article.summary.is_empty() {
            findings
                .data_points
                .push(format!("{}: {}", article.published_at, article.summary));
        }
    }
    findings
}
