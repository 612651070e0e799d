//! In-memory stand-ins for the network seams, shared by the pipeline tests.

use crate::domain::contract::ResearchFindings;
use crate::domain::profile::{RiskTolerance, UserProfile};
use crate::llm::{CompletionRequest, Provider, ReasoningClient};
use crate::news::fetcher::PageFetcher;
use crate::news::NewsAggregator;
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::research::ResearchTool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct NoPages;

#[async_trait::async_trait]
impl PageFetcher for NoPages {
    async fn fetch_page(&self, url: &str) -> anyhow::Result<String> {
        anyhow::bail!("offline: {url}")
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(String),
    Hang,
}

/// Answers per stage name; stages without a script get an empty JSON object.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    replies: HashMap<&'static str, Reply>,
    latency: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub(crate) fn reply(mut self, stage: &'static str, reply: Reply) -> Self {
        self.replies.insert(stage, reply);
        self
    }

    pub(crate) fn text(self, stage: &'static str, text: &str) -> Self {
        self.reply(stage, Reply::Text(text.to_string()))
    }

    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_for(&self, stage: &str) -> Option<CompletionRequest> {
        self.requests().into_iter().find(|r| r.stage == stage)
    }
}

#[async_trait::async_trait]
impl ReasoningClient for ScriptedClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        let stage = request.stage;
        self.requests.lock().unwrap().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.replies.get(stage).cloned() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(detail)) => anyhow::bail!("{detail}"),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok("{}".to_string()),
        }
    }
}

pub(crate) struct StaticResearch(pub(crate) anyhow::Result<ResearchFindings>);

#[async_trait::async_trait]
impl ResearchTool for StaticResearch {
    fn name(&self) -> &'static str {
        "financial_research"
    }

    async fn research(&self, _query: &str) -> anyhow::Result<ResearchFindings> {
        match &self.0 {
            Ok(findings) => Ok(findings.clone()),
            Err(err) => anyhow::bail!("{err:#}"),
        }
    }
}

pub(crate) fn index_fund_findings() -> ResearchFindings {
    ResearchFindings {
        sources: vec!["https://news.example.com/index-funds-inflows".to_string()],
        key_findings: vec!["Index funds see record inflows (wire)".to_string()],
        data_points: vec!["Expense ratios average 0.2%".to_string()],
    }
}

pub(crate) fn orchestrator(client: Arc<ScriptedClient>) -> Orchestrator {
    orchestrator_with_research(client, StaticResearch(Ok(index_fund_findings())))
}

pub(crate) fn orchestrator_with_research(
    client: Arc<ScriptedClient>,
    research: StaticResearch,
) -> Orchestrator {
    Orchestrator::builder(client)
        .news(NewsAggregator::new(Arc::new(NoPages)))
        .sources(Vec::new())
        .research_tool(Arc::new(research))
        .stage_timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

pub(crate) fn young_aggressive_profile() -> UserProfile {
    UserProfile {
        age: 25,
        income: 1_200_000.0,
        dependents: 0,
        investment_horizon: 20,
        existing_investments: Vec::new(),
        risk_tolerance: RiskTolerance::High,
        goals: Vec::new(),
    }
}
