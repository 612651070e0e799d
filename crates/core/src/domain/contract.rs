//! Output contract for every reasoning stage.
//!
//! Models are asked for `{"<envelope>": {...}}`. Whatever comes back is first turned into a
//! schema-complete JSON record by `llm::json::parse_stage_output` and then converted leniently
//! into the typed structs below; a field with the wrong JSON type falls back to the schema
//! default instead of failing the run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Allowed distance of the allocation sum from 100 before it is normalized.
pub const ALLOCATION_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    RiskAnalysis,
    MarketAnalysis,
    InvestmentRecommendation,
    ChatAdvice,
}

impl StageKind {
    pub fn envelope(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::RiskAnalysis => "risk_analysis",
            Self::MarketAnalysis => "market_analysis",
            Self::InvestmentRecommendation => "recommendations",
            Self::ChatAdvice => "advice",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Research => &["sources", "key_findings", "data_points"],
            Self::RiskAnalysis => &["risk_score", "risk_category", "key_factors", "recommendations"],
            Self::MarketAnalysis => &["market_trends", "key_insights", "impact_analysis"],
            Self::InvestmentRecommendation => &["asset_allocation", "specific_recommendations"],
            Self::ChatAdvice => &["analysis", "recommendations", "supporting_data", "sources"],
        }
    }

    pub fn default_record(self) -> Map<String, Value> {
        let v = match self {
            Self::Research => json!({
                "sources": [],
                "key_findings": [],
                "data_points": [],
            }),
            Self::RiskAnalysis => json!({
                "risk_score": 50.0,
                "risk_category": "Moderate",
                "key_factors": ["Profile-based baseline assessment"],
                "recommendations": ["Keep the portfolio diversified across asset classes"],
            }),
            Self::MarketAnalysis => json!({
                "market_trends": ["No market trend data available"],
                "key_insights": ["No market insights available"],
                "impact_analysis": ["Market impact could not be assessed"],
            }),
            Self::InvestmentRecommendation => json!({
                "asset_allocation": {
                    "equity": 50.0,
                    "debt": 30.0,
                    "gold": 10.0,
                    "real_estate": 10.0,
                },
                "specific_recommendations": [
                    {
                        "type": "equity",
                        "instrument": "Diversified Index Fund",
                        "allocation": 50.0,
                        "reasoning": "Broad market exposure at low cost",
                    }
                ],
            }),
            Self::ChatAdvice => json!({
                "analysis": "",
                "recommendations": [],
                "supporting_data": [],
                "sources": [],
            }),
        };

        match v {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.envelope())
    }
}

/// Envelope key plus the defaults substituted for missing required fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSchema {
    pub kind: StageKind,
    pub defaults: Map<String, Value>,
}

impl StageSchema {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            defaults: kind.default_record(),
        }
    }

    pub fn with_default(mut self, key: &str, value: Value) -> Self {
        self.defaults.insert(key.to_string(), value);
        self
    }

    pub fn envelope(&self) -> &'static str {
        self.kind.envelope()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCategory {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskCategory {
    /// [0,30] Conservative, (30,70] Moderate, (70,100] Aggressive.
    pub fn from_score(score: f64) -> Self {
        if score <= 30.0 {
            Self::Conservative
        } else if score <= 70.0 {
            Self::Moderate
        } else {
            Self::Aggressive
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "Conservative",
            Self::Moderate => "Moderate",
            Self::Aggressive => "Aggressive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub key_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

impl RiskAnalysis {
    fn from_fields(fields: &Fields<'_>) -> Self {
        let risk_score = fields.number("risk_score").unwrap_or(50.0).clamp(0.0, 100.0);
        let risk_category = RiskCategory::from_score(risk_score);

        let stated = fields.text("risk_category");
        if !stated.is_empty() && !stated.eq_ignore_ascii_case(risk_category.as_str()) {
            tracing::warn!(
                risk_score,
                stated = %stated,
                derived = risk_category.as_str(),
                "risk_category disagrees with score band; using derived category"
            );
        }

        Self {
            risk_score,
            risk_category,
            key_factors: fields.list("key_factors"),
            recommendations: fields.list("recommendations"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub market_trends: Vec<String>,
    pub key_insights: Vec<String>,
    pub impact_analysis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub instrument: String,
    pub allocation: f64,
    pub reasoning: String,
}

impl SpecificRecommendation {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Object(map) => {
                let fields = Fields {
                    record: map,
                    defaults: None,
                };
                let instrument = fields.text("instrument");
                let kind = fields.text("type");
                if instrument.is_empty() && kind.is_empty() {
                    return None;
                }
                Some(Self {
                    kind,
                    instrument,
                    allocation: fields
                        .number("allocation")
                        .filter(|n| *n >= 0.0)
                        .unwrap_or(0.0),
                    reasoning: fields.text("reasoning"),
                })
            }
            Value::String(s) if !s.trim().is_empty() => Some(Self {
                kind: String::new(),
                instrument: s.trim().to_string(),
                allocation: 0.0,
                reasoning: String::new(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentRecommendation {
    /// Category -> percent of the portfolio.
    pub asset_allocation: BTreeMap<String, f64>,
    pub specific_recommendations: Vec<SpecificRecommendation>,
    /// Set when the allocation had to be repaired; explains what was changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_note: Option<String>,
}

impl InvestmentRecommendation {
    fn from_fields(fields: &Fields<'_>) -> Self {
        let asset_allocation = fields
            .get("asset_allocation")
            .and_then(allocation_from_value)
            .unwrap_or_default();

        let specific_recommendations = match fields.get("specific_recommendations") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(SpecificRecommendation::from_value)
                .collect(),
            _ => Vec::new(),
        };

        let default_allocation = fields
            .defaults
            .and_then(|d| d.get("asset_allocation"))
            .and_then(allocation_from_value)
            .unwrap_or_default();

        let mut out = Self {
            asset_allocation,
            specific_recommendations,
            allocation_note: None,
        };
        out.normalize_allocation(&default_allocation);
        out
    }

    pub fn allocation_total(&self) -> f64 {
        self.asset_allocation.values().sum()
    }

    /// Negative or non-finite entries are dropped, an empty allocation falls back to
    /// `default_allocation`, and a sum off 100 by more than `ALLOCATION_TOLERANCE` is scaled
    /// proportionally. Every change is logged and explained in `allocation_note`.
    pub fn normalize_allocation(&mut self, default_allocation: &BTreeMap<String, f64>) {
        let mut notes = Vec::new();

        let before = self.asset_allocation.len();
        self.asset_allocation
            .retain(|_, pct| pct.is_finite() && *pct >= 0.0);
        let dropped = before - self.asset_allocation.len();
        if dropped > 0 {
            notes.push(format!("dropped {dropped} negative or invalid allocation entries"));
        }

        let total = self.allocation_total();
        if total <= 0.0 {
            self.asset_allocation = default_allocation.clone();
            notes.push("allocation was empty; default allocation applied".to_string());
        } else if (total - 100.0).abs() > ALLOCATION_TOLERANCE {
            for pct in self.asset_allocation.values_mut() {
                *pct = round2(*pct * 100.0 / total);
            }
            notes.push(format!(
                "allocation summed to {}; normalized to 100",
                round2(total)
            ));
        }

        if !notes.is_empty() {
            let note = notes.join("; ");
            tracing::warn!(original_total = round2(total), note = %note, "asset allocation adjusted");
            self.allocation_note = Some(note);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAdvice {
    pub analysis: String,
    pub recommendations: Vec<String>,
    pub supporting_data: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub sources: Vec<String>,
    pub key_findings: Vec<String>,
    pub data_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageResult {
    Research(ResearchFindings),
    RiskAnalysis(RiskAnalysis),
    MarketAnalysis(MarketAnalysis),
    InvestmentRecommendation(InvestmentRecommendation),
    ChatAdvice(ChatAdvice),
}

impl StageResult {
    /// `record` is expected to be schema-complete; `defaults` covers fields of the wrong type.
    pub fn from_record(schema: &StageSchema, record: &Map<String, Value>) -> Self {
        let fields = Fields {
            record,
            defaults: Some(&schema.defaults),
        };

        match schema.kind {
            StageKind::Research => Self::Research(ResearchFindings {
                sources: fields.list("sources"),
                key_findings: fields.list("key_findings"),
                data_points: fields.list("data_points"),
            }),
            StageKind::RiskAnalysis => Self::RiskAnalysis(RiskAnalysis::from_fields(&fields)),
            StageKind::MarketAnalysis => Self::MarketAnalysis(MarketAnalysis {
                market_trends: fields.list("market_trends"),
                key_insights: fields.list("key_insights"),
                impact_analysis: fields.list("impact_analysis"),
            }),
            StageKind::InvestmentRecommendation => {
                Self::InvestmentRecommendation(InvestmentRecommendation::from_fields(&fields))
            }
            StageKind::ChatAdvice => Self::ChatAdvice(ChatAdvice {
                analysis: fields.text("analysis"),
                recommendations: fields.list("recommendations"),
                supporting_data: fields.list("supporting_data"),
                sources: fields.list("sources"),
            }),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Self::Research(_) => StageKind::Research,
            Self::RiskAnalysis(_) => StageKind::RiskAnalysis,
            Self::MarketAnalysis(_) => StageKind::MarketAnalysis,
            Self::InvestmentRecommendation(_) => StageKind::InvestmentRecommendation,
            Self::ChatAdvice(_) => StageKind::ChatAdvice,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Lenient accessors over a parsed record, falling back to schema defaults per field.
struct Fields<'a> {
    record: &'a Map<String, Value>,
    defaults: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.record
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| self.defaults.and_then(|d| d.get(key)))
    }

    fn from_defaults(&self, key: &str) -> Option<&'a Value> {
        self.defaults.and_then(|d| d.get(key))
    }

    fn text(&self, key: &str) -> String {
        self.get(key)
            .and_then(text_from_value)
            .or_else(|| self.from_defaults(key).and_then(text_from_value))
            .unwrap_or_default()
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.get(key)
            .and_then(number_from_value)
            .or_else(|| self.from_defaults(key).and_then(number_from_value))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(list_from_value)
            .or_else(|| self.from_defaults(key).and_then(list_from_value))
            .unwrap_or_default()
    }
}

fn text_from_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(text_from_value)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Object(_) | Value::Null => None,
    }
}

fn number_from_value(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn list_from_value(v: &Value) -> Option<Vec<String>> {
    match v {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::String(s) if !s.trim().is_empty() => Some(vec![s.trim().to_string()]),
        _ => None,
    }
}

fn allocation_from_value(v: &Value) -> Option<BTreeMap<String, f64>> {
    let Value::Object(map) = v else {
        return None;
    };
    Some(
        map.iter()
            .filter_map(|(k, v)| number_from_value(v).map(|n| (k.trim().to_string(), n)))
            .collect(),
    )
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
