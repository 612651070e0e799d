pub mod domain;
pub mod llm;
pub mod news;
pub mod pipeline;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_FEED_LIMIT: usize = 20;
    const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 90;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub news_sources_file: Option<String>,
        pub news_feed_limit: usize,
        pub stage_timeout_secs: u64,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let news_feed_limit = positive_int(
                "NEWS_FEED_LIMIT",
                std::env::var("NEWS_FEED_LIMIT").ok(),
                DEFAULT_FEED_LIMIT,
            )?;
            let stage_timeout_secs = positive_int(
                "STAGE_TIMEOUT_SECS",
                std::env::var("STAGE_TIMEOUT_SECS").ok(),
                DEFAULT_STAGE_TIMEOUT_SECS,
            )?;

            Ok(Self {
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                news_sources_file: std::env::var("NEWS_SOURCES_FILE")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                news_feed_limit,
                stage_timeout_secs,
            })
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn stage_timeout(&self) -> Duration {
            Duration::from_secs(self.stage_timeout_secs)
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                anthropic_api_key: None,
                sentry_dsn: None,
                news_sources_file: None,
                news_feed_limit: DEFAULT_FEED_LIMIT,
                stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            }
        }
    }

    /// Unset or blank falls back to `default`; anything else must parse and be >= 1.
    fn positive_int<T>(name: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr + PartialOrd + From<u8>,
    {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Ok(default);
        };
        let value = raw
            .trim()
            .parse::<T>()
            .ok()
            .with_context(|| format!("{name} must be an integer (got {raw})"))?;
        anyhow::ensure!(value >= T::from(1), "{name} must be >= 1");
        Ok(value)
    }

}
