use crate::domain::contract::{ChatAdvice, StageResult};
use crate::domain::response::ChatResponse;
use crate::pipeline::error::PipelineError;
use crate::pipeline::{StageContext, StageName};
use chrono::Utc;

pub const FALLBACK_ANSWER: &str =
    "I could not put together an answer to that question right now. Please try again shortly.";

/// Maps the advice output (plus research sources as a fallback) into the chat response.
pub fn assemble(outputs: &StageContext) -> Result<ChatResponse, PipelineError> {
    let advice_output = outputs.get(StageName::Advice).ok_or_else(|| {
        PipelineError::InvalidGraph("chat run finished without advice".to_string())
    })?;
    let StageResult::ChatAdvice(advice) = &advice_output.result else {
        return Err(PipelineError::InvalidGraph(format!(
            "advice stage produced {}",
            advice_output.result.kind()
        )));
    };

    let answer = match advice_output.narrative.as_deref() {
        Some(narrative) if !advice_output.structured => narrative.to_string(),
        _ => render_answer(advice),
    };
    let answer = if answer.trim().is_empty() {
        FALLBACK_ANSWER.to_string()
    } else {
        answer
    };

    let sources = if advice.sources.is_empty() {
        research_sources(outputs)
    } else {
        advice.sources.clone()
    };

    Ok(ChatResponse {
        answer,
        sources,
        timestamp: Utc::now(),
    })
}

/// Analysis, a blank line, then one `- ` bullet per recommendation.
pub fn render_answer(advice: &ChatAdvice) -> String {
    let bullets = advice
        .recommendations
        .iter()
        .map(|r| format!("- {r}"))
        .collect::<Vec<_>>()
        .join("\n");

    match (advice.analysis.trim(), bullets.is_empty()) {
        ("", _) => bullets,
        (analysis, true) => analysis.to_string(),
        (analysis, false) => format!("{analysis}\n\n{bullets}"),
    }
}

fn research_sources(outputs: &StageContext) -> Vec<String> {
    match outputs.get(StageName::Research).map(|o| &o.result) {
        Some(StageResult::Research(findings)) => findings.sources.clone(),
        _ => Vec::new(),
    }
}
