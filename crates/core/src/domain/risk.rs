use crate::domain::profile::{RiskTolerance, UserProfile};

const NEUTRAL_SCORE: f64 = 50.0;

/// Rule-based risk score in [0, 100] derived from the profile alone.
///
/// The risk stage is instructed with the same factors; this value is handed to the model as a
/// reference point and doubles as the schema default when the model output has no score.
pub fn baseline_risk_score(profile: &UserProfile) -> f64 {
    let mut score = NEUTRAL_SCORE;

    score += match profile.age {
        0..=29 => 15.0,
        30..=44 => 5.0,
        45..=59 => -10.0,
        _ => -20.0,
    };

    // Income is taken as annual, in the caller's currency.
    if profile.income <= 0.0 {
        score -= 10.0;
    } else if profile.income >= 1_000_000.0 {
        score += 5.0;
    }

    score -= (profile.dependents.min(4) as f64) * 5.0;

    score += match profile.investment_horizon {
        0..=2 => -15.0,
        3..=6 => 0.0,
        7..=14 => 5.0,
        _ => 15.0,
    };

    let equity_like = profile
        .existing_investments
        .iter()
        .filter(|inv| inv.is_equity_like())
        .count();
    if !profile.existing_investments.is_empty()
        && equity_like * 2 > profile.existing_investments.len()
    {
        // Already heavily exposed; leave less room for more risk.
        score -= 5.0;
    }

    score += match profile.risk_tolerance {
        RiskTolerance::Low => -20.0,
        RiskTolerance::Moderate => 0.0,
        RiskTolerance::High => 15.0,
    };

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::RiskCategory;
    use crate::domain::profile::ExistingInvestment;

    fn profile(age: u32, dependents: u32, horizon: u32, tolerance: RiskTolerance) -> UserProfile {
        UserProfile {
            age,
            income: 600_000.0,
            dependents,
            investment_horizon: horizon,
            existing_investments: Vec::new(),
            risk_tolerance: tolerance,
            goals: Vec::new(),
        }
    }

    #[test]
    fn young_high_tolerance_long_horizon_is_never_conservative() {
        let p = profile(25, 0, 20, RiskTolerance::High);
        let score = baseline_risk_score(&p);
        assert_ne!(RiskCategory::from_score(score), RiskCategory::Conservative);
        assert_eq!(RiskCategory::from_score(score), RiskCategory::Aggressive);
    }

    #[test]
    fn retiree_low_tolerance_is_conservative() {
        let p = profile(67, 1, 2, RiskTolerance::Low);
        let score = baseline_risk_score(&p);
        assert_eq!(score, 0.0);
        assert_eq!(RiskCategory::from_score(score), RiskCategory::Conservative);
    }

    #[test]
    fn dependents_reduce_score_with_a_cap() {
        let base = baseline_risk_score(&profile(35, 0, 10, RiskTolerance::Moderate));
        let two = baseline_risk_score(&profile(35, 2, 10, RiskTolerance::Moderate));
        let many = baseline_risk_score(&profile(35, 9, 10, RiskTolerance::Moderate));
        assert_eq!(base - two, 10.0);
        assert_eq!(base - many, 20.0);
    }

    #[test]
    fn heavy_equity_exposure_lowers_score() {
        let mut p = profile(35, 0, 10, RiskTolerance::Moderate);
        let before = baseline_risk_score(&p);
        p.existing_investments = vec![ExistingInvestment {
            kind: Some("Equity".to_string()),
            amount: Some(100.0),
            ..Default::default()
        }];
        assert_eq!(before - baseline_risk_score(&p), 5.0);
    }
}
