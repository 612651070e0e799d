use crate::domain::contract::{InvestmentRecommendation, MarketAnalysis, RiskAnalysis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WealthManagementResponse {
    pub risk_analysis: RiskAnalysis,
    pub market_analysis: MarketAnalysis,
    pub recommendations: InvestmentRecommendation,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
