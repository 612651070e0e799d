use crate::config::Settings;
use crate::domain::contract::{ResearchFindings, RiskCategory, StageResult, StageSchema};
use crate::domain::news::DEFAULT_FEED_LIMIT;
use crate::domain::profile::UserProfile;
use crate::domain::response::{ChatResponse, WealthManagementResponse};
use crate::domain::risk::baseline_risk_score;
use crate::llm::anthropic::AnthropicClient;
use crate::llm::error::ReasoningError;
use crate::llm::json::parse_stage_output;
use crate::llm::{CompletionRequest, ReasoningClient, ToolOutput};
use crate::news::source::{default_sources, load_sources, SourceConfig};
use crate::news::NewsAggregator;
use crate::pipeline::error::PipelineError;
use crate::pipeline::prompts::{self, StagePrompt};
use crate::pipeline::research::{NewsResearchTool, ResearchTool};
use crate::pipeline::{chat, wealth, PipelineRun, StageContext, StageName, StageOutput, TaskGraph};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(90);

/// What a run was started with.
#[derive(Debug, Clone)]
pub enum RunInput {
    Chat { query: String },
    Wealth { profile: UserProfile },
}

impl RunInput {
    fn label(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Wealth { .. } => "wealth",
        }
    }
}

/// Everything one stage call needs; built right before the call.
struct StagePlan {
    schema: StageSchema,
    request: CompletionRequest,
    /// URLs the research tool returned; always kept in the research result.
    tool_sources: Vec<String>,
}

/// Immutable collaborators shared by all runs. Each request gets its own `PipelineRun`.
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn ReasoningClient>,
    news: NewsAggregator,
    sources: Arc<Vec<SourceConfig>>,
    research: Arc<dyn ResearchTool>,
    stage_timeout: Duration,
    feed_limit: usize,
}

pub struct OrchestratorBuilder {
    client: Arc<dyn ReasoningClient>,
    news: Option<NewsAggregator>,
    sources: Option<Vec<SourceConfig>>,
    research: Option<Arc<dyn ResearchTool>>,
    stage_timeout: Duration,
    feed_limit: usize,
}

impl OrchestratorBuilder {
    pub fn news(mut self, news: NewsAggregator) -> Self {
        self.news = Some(news);
        self
    }

    pub fn sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn research_tool(mut self, research: Arc<dyn ResearchTool>) -> Self {
        self.research = Some(research);
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn feed_limit(mut self, limit: usize) -> Self {
        self.feed_limit = limit;
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        anyhow::ensure!(self.feed_limit >= 1, "feed limit must be >= 1");
        anyhow::ensure!(!self.stage_timeout.is_zero(), "stage timeout must be non-zero");

        let news = match self.news {
            Some(news) => news,
            None => NewsAggregator::from_env()?,
        };
        let sources = self
            .sources
            .unwrap_or_else(default_sources);
        let research = match self.research {
            Some(research) => research,
            None => Arc::new(NewsResearchTool::new(
                news.clone(),
                sources.clone(),
                self.feed_limit,
            )),
        };

        Ok(Orchestrator {
            client: self.client,
            news,
            sources: Arc::new(sources),
            research,
            stage_timeout: self.stage_timeout,
            feed_limit: self.feed_limit,
        })
    }
}

impl Orchestrator {
    pub fn builder(client: Arc<dyn ReasoningClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            client,
            news: None,
            sources: None,
            research: None,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            feed_limit: DEFAULT_FEED_LIMIT,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client = AnthropicClient::from_settings(settings)?;
        Self::builder(Arc::new(client))
            .news(NewsAggregator::from_env()?)
            .sources(load_sources(settings)?)
            .stage_timeout(settings.stage_timeout())
            .feed_limit(settings.news_feed_limit)
            .build()
    }

    pub async fn run_chat(&self, query: &str) -> Result<ChatResponse, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::Validation("query must be non-empty".to_string()));
        }

        let input = RunInput::Chat {
            query: query.to_string(),
        };
        let run = self.run(TaskGraph::chat(), &input).await?;
        chat::assemble(run.outputs())
    }

    pub async fn run_wealth(
        &self,
        profile: UserProfile,
    ) -> Result<WealthManagementResponse, PipelineError> {
        profile
            .validate()
            .map_err(|err| PipelineError::Validation(format!("{err:#}")))?;

        let input = RunInput::Wealth { profile };
        let run = self.run(TaskGraph::wealth(), &input).await?;
        wealth::assemble(run.outputs())
    }

    /// Runs `graph` to completion on a fresh `PipelineRun`.
    pub async fn run(&self, graph: TaskGraph, input: &RunInput) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(graph);
        self.execute(&mut run, input).await?;
        Ok(run)
    }

    /// Drives `run` through its graph. On error the run is left FAILED.
    pub async fn execute(&self, run: &mut PipelineRun, input: &RunInput) -> Result<(), PipelineError> {
        let span = tracing::info_span!("pipeline_run", run_id = %run.id, graph = input.label());
        let result = self
            .execute_waves(run, input)
            .instrument(span.clone())
            .await;

        if let Err(err) = &result {
            run.fail();
            span.in_scope(|| tracing::error!(error = %err, "pipeline run failed"));
        }
        result
    }

    /// Stages of one wave run concurrently; a wave starts only after every stage of the previous
    /// wave has an output.
    async fn execute_waves(&self, run: &mut PipelineRun, input: &RunInput) -> Result<(), PipelineError> {
        let waves = run.graph().waves()?;
        let started = Instant::now();
        run.start();

        for wave in waves {
            let mut calls = Vec::with_capacity(wave.len());
            for stage in &wave {
                let upstream = run.outputs().upstream(run.graph().dependencies(*stage))?;
                run.mark_running(*stage);
                calls.push(self.run_stage(*stage, input, upstream));
            }

            let results = futures::future::join_all(calls).await;
            for (stage, result) in wave.into_iter().zip(results) {
                run.complete_stage(stage, result?);
            }
        }

        run.finish()?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline run complete"
        );
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: StageName,
        input: &RunInput,
        upstream: StageContext,
    ) -> Result<StageOutput, PipelineError> {
        let plan = self.plan(stage, input, &upstream).await?;
        let started = Instant::now();

        match tokio::time::timeout(self.stage_timeout, self.client.complete(plan.request)).await {
            Ok(Ok(text)) => {
                let parsed = parse_stage_output(&text, &plan.schema);
                let mut output = StageOutput::from_parsed(&plan.schema, parsed);
                merge_tool_sources(&mut output, &plan.tool_sources);
                tracing::info!(
                    stage = %stage,
                    provider = ?self.client.provider(),
                    structured = output.structured,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stage done"
                );
                Ok(output)
            }
            Ok(Err(err)) => {
                if let Some(diag) = err.downcast_ref::<ReasoningError>() {
                    tracing::error!(
                        stage = %stage,
                        provider = ?diag.provider,
                        raw_output = diag.raw_output.as_deref().unwrap_or_default(),
                        "reasoning call failed"
                    );
                }
                Err(PipelineError::StageFailed {
                    stage,
                    detail: format!("{err:#}"),
                })
            }
            Err(_) => {
                tracing::warn!(
                    stage = %stage,
                    timeout_secs = self.stage_timeout.as_secs(),
                    "stage timed out; using fallback record"
                );
                Ok(StageOutput::fallback(&plan.schema))
            }
        }
    }

    async fn plan(
        &self,
        stage: StageName,
        input: &RunInput,
        upstream: &StageContext,
    ) -> Result<StagePlan, PipelineError> {
        let mut schema = StageSchema::new(stage.kind());
        let mut tool_outputs = Vec::new();
        let mut tool_sources = Vec::new();

        let prompt: StagePrompt = match (stage, input) {
            (StageName::Research, RunInput::Chat { query }) => {
                let findings = match self.research.research(query).await {
                    Ok(findings) => findings,
                    Err(err) => {
                        tracing::warn!(tool = self.research.name(), error = %format!("{err:#}"), "research tool failed; continuing without findings");
                        ResearchFindings::default()
                    }
                };
                tool_outputs.push(ToolOutput {
                    name: self.research.name().to_string(),
                    content: serde_json::to_value(&findings).unwrap_or_default(),
                });
                // Prose, partial or timed-out replies still carry the tool's findings.
                schema = schema
                    .with_default("sources", json!(findings.sources))
                    .with_default("key_findings", json!(findings.key_findings))
                    .with_default("data_points", json!(findings.data_points));
                tool_sources = findings.sources;
                prompts::research(query)
            }
            (StageName::Advice, RunInput::Chat { query }) => prompts::advice(query, upstream),
            (StageName::RiskAnalysis, RunInput::Wealth { profile }) => {
                let baseline = baseline_risk_score(profile);
                schema = schema
                    .with_default("risk_score", json!(baseline))
                    .with_default(
                        "risk_category",
                        json!(RiskCategory::from_score(baseline).as_str()),
                    );
                prompts::risk_analysis(profile, baseline)
            }
            (StageName::MarketNewsAnalysis, RunInput::Wealth { profile }) => {
                let feed = self.news.fetch_feed(&self.sources, self.feed_limit).await;
                tool_outputs.push(ToolOutput {
                    name: "market_news".to_string(),
                    content: serde_json::to_value(&feed).unwrap_or_default(),
                });
                prompts::market_news_analysis(profile)
            }
            (StageName::Recommendation, RunInput::Wealth { profile }) => {
                prompts::recommendation(profile, upstream)
            }
            (stage, input) => {
                return Err(PipelineError::InvalidGraph(format!(
                    "stage {stage} cannot run in a {} pipeline",
                    input.label()
                )))
            }
        };

        Ok(StagePlan {
            schema,
            request: CompletionRequest {
                stage: stage.as_str(),
                system: prompt.system,
                prompt: prompt.prompt,
                tool_outputs,
            },
            tool_sources,
        })
    }
}

/// Appends tool URLs the model did not cite itself; model order comes first.
fn merge_tool_sources(output: &mut StageOutput, tool_sources: &[String]) {
    let StageResult::Research(findings) = &mut output.result else {
        return;
    };
    for url in tool_sources {
        if !findings.sources.contains(url) {
            findings.sources.push(url.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{
        index_fund_findings, orchestrator, young_aggressive_profile, Reply, ScriptedClient,
    };
    use crate::pipeline::{RunStatus, StageStatus};

    #[tokio::test]
    async fn recommendation_sees_both_upstream_outputs() {
        let client = Arc::new(
            ScriptedClient::default()
                .text(
                    "risk_analysis",
                    r#"{"risk_analysis": {"risk_score": 80, "risk_category": "Aggressive", "key_factors": ["RISK_MARKER"], "recommendations": []}}"#,
                )
                .text(
                    "market_news_analysis",
                    r#"{"market_analysis": {"market_trends": ["TREND_MARKER"], "key_insights": [], "impact_analysis": []}}"#,
                ),
        );
        let orch = orchestrator(client.clone());

        let run = orch
            .run(
                TaskGraph::wealth(),
                &RunInput::Wealth {
                    profile: young_aggressive_profile(),
                },
            )
            .await
            .unwrap();

        assert_eq!(run.status(), RunStatus::Complete);
        for stage in run.graph().stages().collect::<Vec<_>>() {
            assert_eq!(run.stage_status(stage), Some(StageStatus::Done));
        }

        let rec = client.request_for("recommendation").unwrap();
        assert!(rec.prompt.contains("RISK_MARKER"));
        assert!(rec.prompt.contains("TREND_MARKER"));
        assert!(rec.prompt.contains("\"risk_analysis\""));
        assert!(rec.prompt.contains("\"market_news_analysis\""));

        // The recommendation call is issued after both of its dependencies were answered.
        let order = client.requests().iter().map(|r| r.stage).collect::<Vec<_>>();
        assert_eq!(order.last(), Some(&"recommendation"));
    }

    #[tokio::test]
    async fn reasoning_failure_fails_the_run() {
        let client = Arc::new(
            ScriptedClient::default().reply("risk_analysis", Reply::Fail("status=529".to_string())),
        );
        let orch = orchestrator(client.clone());

        let err = orch
            .run_wealth(young_aggressive_profile())
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            PipelineError::StageFailed { stage: StageName::RiskAnalysis, detail } if detail.contains("529")
        ));
        assert!(!err.is_client_error());
        assert!(client.request_for("recommendation").is_none());
    }

    #[tokio::test]
    async fn failed_run_reports_failed_status() {
        let client = Arc::new(
            ScriptedClient::default().reply("research", Reply::Fail("connection reset".to_string())),
        );
        let orch = orchestrator(client);
        let input = RunInput::Chat {
            query: "index funds".to_string(),
        };

        let mut run = PipelineRun::new(TaskGraph::chat());
        let err = orch.execute(&mut run, &input).await.unwrap_err();

        assert!(matches!(err, PipelineError::StageFailed { stage: StageName::Research, .. }));
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.stage_status(StageName::Research), Some(StageStatus::Running));
        assert_eq!(run.stage_status(StageName::Advice), Some(StageStatus::Pending));
        assert!(run.outputs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_stage_falls_back_and_run_continues() {
        let client = Arc::new(ScriptedClient::default().reply("market_news_analysis", Reply::Hang));
        let orch = orchestrator(client.clone());

        let res = orch.run_wealth(young_aggressive_profile()).await.unwrap();
        assert_eq!(
            res.market_analysis.market_trends,
            vec!["No market trend data available".to_string()]
        );
        assert!(client.request_for("recommendation").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_wealth_stages_overlap() {
        let client = Arc::new(ScriptedClient::default().latency(Duration::from_secs(5)));
        let orch = orchestrator(client);

        let started = tokio::time::Instant::now();
        orch.run_wealth(young_aggressive_profile()).await.unwrap();

        // Two waves of 5s each; running the first wave sequentially would take 15s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(15), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn risk_fallback_uses_profile_baseline() {
        let client = Arc::new(
            ScriptedClient::default().text("risk_analysis", "I would rather not give a number."),
        );
        let orch = orchestrator(client);

        let run = orch
            .run(
                TaskGraph::wealth(),
                &RunInput::Wealth {
                    profile: young_aggressive_profile(),
                },
            )
            .await
            .unwrap();

        let risk = run.outputs().get(StageName::RiskAnalysis).unwrap();
        assert!(!risk.structured);
        assert_eq!(risk.narrative.as_deref(), Some("I would rather not give a number."));
        let StageResult::RiskAnalysis(r) = &risk.result else {
            panic!("expected risk analysis");
        };
        assert_eq!(r.risk_score, baseline_risk_score(&young_aggressive_profile()));
        assert_eq!(r.risk_category, RiskCategory::Aggressive);
    }

    #[tokio::test]
    async fn stage_outside_its_pipeline_is_rejected() {
        let orch = orchestrator(Arc::new(ScriptedClient::default()));
        let graph = TaskGraph::new().stage(StageName::RiskAnalysis, &[]);
        let err = orch
            .run(
                graph,
                &RunInput::Chat {
                    query: "hello".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(_)));
    }

    #[tokio::test]
    async fn cyclic_graph_is_rejected_before_any_call() {
        let client = Arc::new(ScriptedClient::default());
        let orch = orchestrator(client.clone());
        let graph = TaskGraph::new()
            .stage(StageName::Research, &[StageName::Advice])
            .stage(StageName::Advice, &[StageName::Research]);

        let err = orch
            .run(
                graph,
                &RunInput::Chat {
                    query: "hello".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(_)));
        assert!(client.requests().is_empty());
    }

    #[test]
    fn builder_rejects_zero_feed_limit() {
        let res = Orchestrator::builder(Arc::new(ScriptedClient::default()))
            .news(NewsAggregator::new(Arc::new(crate::pipeline::testing::NoPages)))
            .feed_limit(0)
            .build();
        assert!(res.is_err());
    }

    async fn research_output(client: Arc<ScriptedClient>) -> ResearchFindings {
        let run = orchestrator(client)
            .run(
                TaskGraph::chat(),
                &RunInput::Chat {
                    query: "index funds".to_string(),
                },
            )
            .await
            .unwrap();
        match &run.outputs().get(StageName::Research).unwrap().result {
            StageResult::Research(findings) => findings.clone(),
            other => panic!("unexpected research result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn prose_research_reply_keeps_tool_findings() {
        let client = Arc::new(
            ScriptedClient::default().text("research", "Index funds have been popular lately."),
        );
        assert_eq!(research_output(client).await, index_fund_findings());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_research_keeps_tool_findings() {
        let client = Arc::new(ScriptedClient::default().reply("research", Reply::Hang));
        assert_eq!(research_output(client).await, index_fund_findings());
    }

    #[tokio::test]
    async fn tool_sources_are_merged_after_model_sources() {
        let client = Arc::new(ScriptedClient::default().text(
            "research",
            r#"{"research": {"sources": ["https://amfiindia.com/flows", "https://news.example.com/index-funds-inflows"], "key_findings": ["Flows rising"], "data_points": []}}"#,
        ));
        let findings = research_output(client).await;
        assert_eq!(
            findings.sources,
            vec![
                "https://amfiindia.com/flows".to_string(),
                "https://news.example.com/index-funds-inflows".to_string(),
            ]
        );
        assert_eq!(findings.key_findings, vec!["Flows rising".to_string()]);
    }
}
