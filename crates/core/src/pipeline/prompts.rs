use crate::domain::contract::StageKind;
use crate::domain::profile::UserProfile;
use crate::pipeline::StageContext;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct StagePrompt {
    pub system: String,
    pub prompt: String,
}

fn system(role: &str, kind: StageKind) -> String {
    let shape = serde_json::to_string(&kind.default_record()).unwrap_or_default();
    format!(
        "{role}\n\nRespond with a single JSON object of the form {{\"{}\": {shape}}} and nothing else. \
         Keep every field; use empty lists rather than omitting a field.",
        kind.envelope()
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

pub fn research(query: &str) -> StagePrompt {
    StagePrompt {
        system: system(
            "You are a financial research analyst. Gather facts, figures and recent market news \
             relevant to the user's question. Cite the URLs you rely on in `sources`.",
            StageKind::Research,
        ),
        prompt: format!("Question: {query}\n\nResearch this question using the tool output below."),
    }
}

pub fn advice(query: &str, upstream: &StageContext) -> StagePrompt {
    StagePrompt {
        system: system(
            "You are a financial advisor. Answer the user's question using the research \
             provided. Be specific and balanced, and mention relevant risks.",
            StageKind::ChatAdvice,
        ),
        prompt: format!(
            "Question: {query}\n\nResearch context:\n{}",
            pretty(&upstream.to_prompt_json())
        ),
    }
}

pub fn risk_analysis(profile: &UserProfile, baseline_score: f64) -> StagePrompt {
    StagePrompt {
        system: system(
            "You are a risk analyst. Score the investor's risk capacity from 0 (lowest) to 100 \
             (highest) weighing age, income, dependents, investment horizon, existing \
             investments and stated risk tolerance. Bands: 0-30 Conservative, 31-70 Moderate, \
             71-100 Aggressive.",
            StageKind::RiskAnalysis,
        ),
        prompt: format!(
            "Investor profile:\n{}\n\nRule-based baseline score: {baseline_score:.0}. \
             Deviate from it only with a stated reason in key_factors.",
            pretty(profile)
        ),
    }
}

pub fn market_news_analysis(profile: &UserProfile) -> StagePrompt {
    StagePrompt {
        system: system(
            "You are a market analyst. Summarise current market trends from the news feed \
             below and assess their impact on an investor like the one described.",
            StageKind::MarketAnalysis,
        ),
        prompt: format!(
            "Investor risk tolerance: {}, horizon: {} years.\n\nAnalyse the market news in the tool output below.",
            profile.risk_tolerance, profile.investment_horizon
        ),
    }
}

pub fn recommendation(profile: &UserProfile, upstream: &StageContext) -> StagePrompt {
    StagePrompt {
        system: system(
            "You are a wealth manager. Build an asset allocation (percentages summing to 100) \
             and specific instrument recommendations that fit the investor's risk analysis, \
             the market analysis and their goals.",
            StageKind::InvestmentRecommendation,
        ),
        prompt: format!(
            "Investor profile:\n{}\n\nGoals:\n{}\n\nUpstream analysis:\n{}",
            pretty(profile),
            pretty(&profile.goals),
            pretty(&upstream.to_prompt_json())
        ),
    }
}
