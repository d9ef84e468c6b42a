//! Moderation rule engine.
//!
//! A pure function of an item's analysis result, run once at the end of
//! a successful analyze task. All thresholds live in [`thresholds`] and
//! are compared with strict `>`.

use serde::{Deserialize, Serialize};

use crate::content::item::ContentAnalysis;

/// Threshold constants for the rule engine. Single source of truth.
pub mod thresholds {
    /// Adult score above this -> `explicit_adult`, nsfw.
    pub const ADULT_EXPLICIT: f64 = 80.0;
    /// Adult score above this (but not explicit) -> `suggestive_adult`, nsfw.
    pub const ADULT_SUGGESTIVE: f64 = 50.0;
    /// Violence score above this -> `graphic_violence`.
    pub const VIOLENCE_GRAPHIC: f64 = 70.0;
    /// Violence score above this (but not graphic) -> `mild_violence`.
    pub const VIOLENCE_MILD: f64 = 40.0;
    /// Aggregate risk above this -> `high_risk`, approval forced off.
    pub const RISK_HIGH: f64 = 75.0;
    /// Aggregate risk above this (but not high) -> `moderate_risk`.
    pub const RISK_MODERATE: f64 = 50.0;
}

/// Flag names produced by the rule engine.
pub mod flags {
    pub const EXPLICIT_ADULT: &str = "explicit_adult";
    pub const SUGGESTIVE_ADULT: &str = "suggestive_adult";
    pub const GRAPHIC_VIOLENCE: &str = "graphic_violence";
    pub const MILD_VIOLENCE: &str = "mild_violence";
    pub const HIGH_RISK: &str = "high_risk";
    pub const MODERATE_RISK: &str = "moderate_risk";
}

/// Deterministic outcome of rule evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verdict {
    /// Flags to append to the item, in evaluation order.
    pub flags: Vec<String>,
    pub nsfw: bool,
    /// When true, approval is forced to false regardless of any prior
    /// auto-approve.
    pub force_reject: bool,
}

/// Evaluate the moderation rules against an analysis result.
pub fn evaluate(analysis: &ContentAnalysis) -> Verdict {
    let mut verdict = Verdict::default();

    if analysis.adult_score > thresholds::ADULT_EXPLICIT {
        verdict.flags.push(flags::EXPLICIT_ADULT.to_string());
        verdict.nsfw = true;
    } else if analysis.adult_score > thresholds::ADULT_SUGGESTIVE {
        verdict.flags.push(flags::SUGGESTIVE_ADULT.to_string());
        verdict.nsfw = true;
    }

    if analysis.violence_score > thresholds::VIOLENCE_GRAPHIC {
        verdict.flags.push(flags::GRAPHIC_VIOLENCE.to_string());
    } else if analysis.violence_score > thresholds::VIOLENCE_MILD {
        verdict.flags.push(flags::MILD_VIOLENCE.to_string());
    }

    if analysis.risk_score > thresholds::RISK_HIGH {
        verdict.flags.push(flags::HIGH_RISK.to_string());
        verdict.force_reject = true;
    } else if analysis.risk_score > thresholds::RISK_MODERATE {
        verdict.flags.push(flags::MODERATE_RISK.to_string());
    }

    verdict
}

/// Remove every flag containing the substring "risk". Manual approval
/// overrides the rule engine's automated risk findings.
pub fn clear_risk_flags(item_flags: &mut Vec<String>) {
    item_flags.retain(|f| !f.contains("risk"));
}
