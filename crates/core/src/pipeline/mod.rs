//! Task graphs, per-run state and the context handed between stages.
//!
//! A `PipelineRun` is built fresh for every request and owns its outputs; nothing here is
//! shared between runs. Stages only ever see an explicit `StageContext` holding the outputs
//! of their declared dependencies.

pub mod chat;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod research;
pub mod wealth;

#[cfg(test)]
pub(crate) mod testing;

use crate::domain::contract::{StageKind, StageResult, StageSchema};
use crate::llm::json::{ParsedOutput, NARRATIVE_FIELD};
use crate::pipeline::error::PipelineError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Research,
    Advice,
    RiskAnalysis,
    MarketNewsAnalysis,
    Recommendation,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Advice => "advice",
            Self::RiskAnalysis => "risk_analysis",
            Self::MarketNewsAnalysis => "market_news_analysis",
            Self::Recommendation => "recommendation",
        }
    }

    /// Output schema family the stage must produce.
    pub fn kind(self) -> StageKind {
        match self {
            Self::Research => StageKind::Research,
            Self::Advice => StageKind::ChatAdvice,
            Self::RiskAnalysis => StageKind::RiskAnalysis,
            Self::MarketNewsAnalysis => StageKind::MarketAnalysis,
            Self::Recommendation => StageKind::InvestmentRecommendation,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub result: StageResult,
    /// False when the model text held no JSON object or the call timed out.
    pub structured: bool,
    /// Raw model text kept when `structured` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

impl StageOutput {
    pub fn from_parsed(schema: &StageSchema, parsed: ParsedOutput) -> Self {
        let narrative = parsed
            .narrative()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            result: StageResult::from_record(schema, &parsed.record),
            structured: parsed.structured,
            narrative,
        }
    }

    /// Schema defaults only.
    pub fn fallback(schema: &StageSchema) -> Self {
        Self {
            result: StageResult::from_record(schema, &schema.defaults),
            structured: false,
            narrative: None,
        }
    }
}

/// Stage outputs in completion order. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageContext {
    entries: Vec<(StageName, StageOutput)>,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and keeps the existing entry) if `stage` already has an output.
    pub fn insert(&mut self, stage: StageName, output: StageOutput) -> bool {
        if self.contains(stage) {
            return false;
        }
        self.entries.push((stage, output));
        true
    }

    pub fn get(&self, stage: StageName) -> Option<&StageOutput> {
        self.entries
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, output)| output)
    }

    pub fn contains(&self, stage: StageName) -> bool {
        self.get(stage).is_some()
    }

    pub fn stages(&self) -> impl Iterator<Item = StageName> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The outputs of exactly `dependencies`, or an error if any of them is missing.
    pub fn upstream(&self, dependencies: &[StageName]) -> Result<StageContext, PipelineError> {
        let mut out = StageContext::new();
        for dep in dependencies {
            let output = self.get(*dep).ok_or_else(|| {
                PipelineError::InvalidGraph(format!("dependency {dep} has no output yet"))
            })?;
            out.insert(*dep, output.clone());
        }
        Ok(out)
    }

    /// `{ "<stage>": <result>, ... }`, with the raw narrative attached to unstructured outputs.
    pub fn to_prompt_json(&self) -> Value {
        let mut map = Map::new();
        for (stage, output) in &self.entries {
            let mut value = output.result.to_json();
            if let (Some(narrative), Value::Object(obj)) = (&output.narrative, &mut value) {
                obj.insert(NARRATIVE_FIELD.to_string(), Value::String(narrative.clone()));
            }
            map.insert(stage.as_str().to_string(), value);
        }
        Value::Object(map)
    }
}

/// Stages plus their dependencies, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    stages: Vec<(StageName, Vec<StageName>)>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, name: StageName, dependencies: &[StageName]) -> Self {
        self.stages.push((name, dependencies.to_vec()));
        self
    }

    /// research -> advice
    pub fn chat() -> Self {
        Self::new()
            .stage(StageName::Research, &[])
            .stage(StageName::Advice, &[StageName::Research])
    }

    /// risk_analysis, market_news_analysis -> recommendation
    pub fn wealth() -> Self {
        Self::new()
            .stage(StageName::RiskAnalysis, &[])
            .stage(StageName::MarketNewsAnalysis, &[])
            .stage(
                StageName::Recommendation,
                &[StageName::RiskAnalysis, StageName::MarketNewsAnalysis],
            )
    }

    pub fn stages(&self) -> impl Iterator<Item = StageName> + '_ {
        self.stages.iter().map(|(name, _)| *name)
    }

    pub fn dependencies(&self, stage: StageName) -> &[StageName] {
        self.stages
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, deps)| deps.as_slice())
            .unwrap_or(&[])
    }

    /// Stages nothing else depends on.
    pub fn terminal_stages(&self) -> Vec<StageName> {
        self.stages()
            .filter(|stage| {
                !self
                    .stages
                    .iter()
                    .any(|(_, deps)| deps.contains(stage))
            })
            .collect()
    }

    /// Groups stages into waves: every stage's dependencies sit in earlier waves, so stages
    /// of one wave may run concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<StageName>>, PipelineError> {
        let mut indegree: HashMap<StageName, usize> = HashMap::new();
        for (name, deps) in &self.stages {
            if indegree.insert(*name, deps.len()).is_some() {
                return Err(PipelineError::InvalidGraph(format!("duplicate stage {name}")));
            }
        }
        for (name, deps) in &self.stages {
            if let Some(unknown) = deps.iter().find(|d| !indegree.contains_key(*d)) {
                return Err(PipelineError::InvalidGraph(format!(
                    "stage {name} depends on unknown stage {unknown}"
                )));
            }
        }

        let mut ready: VecDeque<StageName> =
            self.stages().filter(|s| indegree.get(s) == Some(&0)).collect();
        let mut waves = Vec::new();
        let mut scheduled = 0;

        while !ready.is_empty() {
            let wave: Vec<StageName> = ready.drain(..).collect();
            scheduled += wave.len();
            for (name, deps) in &self.stages {
                let satisfied = deps.iter().filter(|d| wave.contains(*d)).count();
                if satisfied == 0 {
                    continue;
                }
                if let Some(n) = indegree.get_mut(name) {
                    *n -= satisfied;
                    if *n == 0 {
                        ready.push_back(*name);
                    }
                }
            }
            waves.push(wave);
        }

        if scheduled != self.stages.len() {
            let stuck = self
                .stages()
                .filter(|s| indegree.get(s).is_some_and(|n| *n > 0))
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PipelineError::InvalidGraph(format!("dependency cycle among {stuck}")));
        }
        Ok(waves)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
}

/// State of one request's pass through a task graph.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    graph: TaskGraph,
    outputs: StageContext,
    status: RunStatus,
    stage_status: Vec<(StageName, StageStatus)>,
}

impl PipelineRun {
    pub fn new(graph: TaskGraph) -> Self {
        let stage_status = graph.stages().map(|s| (s, StageStatus::Pending)).collect();
        Self {
            id: Uuid::new_v4(),
            graph,
            outputs: StageContext::new(),
            status: RunStatus::Pending,
            stage_status,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn outputs(&self) -> &StageContext {
        &self.outputs
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stage_status(&self, stage: StageName) -> Option<StageStatus> {
        self.stage_status
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, status)| *status)
    }

    fn set_status(&mut self, status: RunStatus) {
        tracing::debug!(from = ?self.status, to = ?status, "run status");
        self.status = status;
    }

    fn set_stage_status(&mut self, stage: StageName, status: StageStatus) {
        if let Some((_, current)) = self.stage_status.iter_mut().find(|(name, _)| *name == stage) {
            tracing::debug!(stage = %stage, from = ?*current, to = ?status, "stage status");
            *current = status;
        }
    }

    pub(crate) fn start(&mut self) {
        self.set_status(RunStatus::Running);
    }

    pub(crate) fn mark_running(&mut self, stage: StageName) {
        self.set_stage_status(stage, StageStatus::Running);
    }

    pub(crate) fn complete_stage(&mut self, stage: StageName, output: StageOutput) {
        if !self.outputs.insert(stage, output) {
            tracing::warn!(stage = %stage, "stage output already recorded; keeping the first");
        }
        self.set_stage_status(stage, StageStatus::Done);
    }

    pub(crate) fn fail(&mut self) {
        self.set_status(RunStatus::Failed);
    }

    /// COMPLETE only once every terminal stage has an output.
    pub(crate) fn finish(&mut self) -> Result<(), PipelineError> {
        let missing = self
            .graph
            .terminal_stages()
            .into_iter()
            .filter(|s| !self.outputs.contains(*s))
            .map(|s| s.as_str())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            self.fail();
            return Err(PipelineError::InvalidGraph(format!(
                "terminal stages without output: {}",
                missing.join(", ")
            )));
        }
        self.set_status(RunStatus::Complete);
        Ok(())
    }
}
