use crate::domain::contract::StageResult;
use crate::domain::response::WealthManagementResponse;
use crate::pipeline::error::PipelineError;
use crate::pipeline::{StageContext, StageName};
use chrono::Utc;

fn missing(stage: StageName, found: Option<&StageResult>) -> PipelineError {
    match found {
        Some(result) => PipelineError::InvalidGraph(format!("{stage} produced {}", result.kind())),
        None => PipelineError::InvalidGraph(format!("wealth run finished without {stage}")),
    }
}

fn result(outputs: &StageContext, stage: StageName) -> Option<&StageResult> {
    outputs.get(stage).map(|o| &o.result)
}

pub fn assemble(outputs: &StageContext) -> Result<WealthManagementResponse, PipelineError> {
    let risk_analysis = match result(outputs, StageName::RiskAnalysis) {
        Some(StageResult::RiskAnalysis(r)) => r.clone(),
        other => return Err(missing(StageName::RiskAnalysis, other)),
    };
    let market_analysis = match result(outputs, StageName::MarketNewsAnalysis) {
        Some(StageResult::MarketAnalysis(m)) => m.clone(),
        other => return Err(missing(StageName::MarketNewsAnalysis, other)),
    };
    let recommendations = match result(outputs, StageName::Recommendation) {
        Some(StageResult::InvestmentRecommendation(r)) => r.clone(),
        other => return Err(missing(StageName::Recommendation, other)),
    };

    Ok(WealthManagementResponse {
        risk_analysis,
        market_analysis,
        recommendations,
        timestamp: Utc::now(),
    })
}
