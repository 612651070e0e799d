use crate::domain::news::{parse_published_at, NewsArticle};
use crate::news::source::{ExtractionRules, SourceConfig};
use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

#[derive(Debug, Clone)]
pub struct CompiledRules {
    article: Regex,
    title: Regex,
    summary: Option<Regex>,
    published: Option<Regex>,
}

impl ExtractionRules {
    pub fn compile(&self) -> anyhow::Result<CompiledRules> {
        let article = Regex::new(&self.article).context("invalid article pattern")?;
        let title = Regex::new(&self.title).context("invalid title pattern")?;
        anyhow::ensure!(
            title.capture_names().flatten().any(|n| n == "title"),
            "title pattern must define a `title` group"
        );

        let summary = self
            .summary
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid summary pattern")?;
        let published = self
            .published
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid published pattern")?;

        Ok(CompiledRules {
            article,
            title,
            summary,
            published,
        })
    }
}

/// Scans one page. Blocks without a usable title or with an unresolvable link are skipped.
pub fn extract_articles(
    html: &str,
    rules: &CompiledRules,
    source: &SourceConfig,
    fetched_at: DateTime<Utc>,
) -> Vec<NewsArticle> {
    let mut out = Vec::new();
    let mut skipped: usize = 0;

    for block in rules.article.find_iter(html) {
        match parse_block(block.as_str(), rules, source, fetched_at) {
            Some(article) => out.push(article),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(source = %source.name, skipped, "skipped unusable article blocks");
    }
    out
}

fn parse_block(
    block: &str,
    rules: &CompiledRules,
    source: &SourceConfig,
    fetched_at: DateTime<Utc>,
) -> Option<NewsArticle> {
    let caps = rules.title.captures(block)?;
    let title = clean_text(caps.name("title")?.as_str());
    if title.is_empty() {
        return None;
    }

    let url = match caps.name("url") {
        Some(m) => resolve_url(&source.base_url, &decode_entities(m.as_str().trim()))?,
        None => String::new(),
    };

    let summary = rules
        .summary
        .as_ref()
        .and_then(|re| re.captures(block))
        .and_then(|c| c.name("summary").map(|m| clean_text(m.as_str())))
        .unwrap_or_default();

    let published_at = rules
        .published
        .as_ref()
        .and_then(|re| re.captures(block))
        .and_then(|c| c.name("published").map(|m| m.as_str().trim().to_string()))
        .filter(|raw| parse_published_at(raw).is_some())
        .unwrap_or_else(|| fetched_at.to_rfc3339());

    Some(NewsArticle {
        title,
        summary,
        url,
        published_at,
        source: source.name.clone(),
    })
}

/// Makes `href` absolute against the source's base URL (RFC 3986 reference resolution).
pub fn resolve_url(base_url: &str, href: &str) -> Option<String> {
    if href.is_empty() {
        return Some(String::new());
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(String::from)
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn clean_text(fragment: &str) -> String {
    decode_entities(&strip_tags(fragment))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
