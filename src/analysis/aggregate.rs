//! Folding per-sample scores into one item-level analysis.

use crate::analysis::FrameAnalysis;
use crate::content::item::ContentAnalysis;

/// Weights for the combined risk score.
const RISK_WEIGHT_ADULT: f64 = 0.40;
const RISK_WEIGHT_VIOLENCE: f64 = 0.30;
const RISK_WEIGHT_RACY: f64 = 0.15;
const RISK_WEIGHT_MEDICAL: f64 = 0.15;

/// Weighted combination of the category scores into one 0..=100 value.
pub fn risk_score(adult: f64, violence: f64, racy: f64, medical: f64) -> f64 {
    RISK_WEIGHT_ADULT * adult
        + RISK_WEIGHT_VIOLENCE * violence
        + RISK_WEIGHT_RACY * racy
        + RISK_WEIGHT_MEDICAL * medical
}

/// Combine per-sample results into one item-level analysis.
///
/// Numeric scores are averaged across samples. Categorical labels
/// (adult category, language, sentiment) come from the first sample.
/// Detected objects are unioned; face count takes the per-sample
/// maximum since the same face appears across frames.
pub fn aggregate_frames(frames: &[FrameAnalysis]) -> ContentAnalysis {
    let mut analysis = ContentAnalysis::default();
    if frames.is_empty() {
        return analysis;
    }

    let n = frames.len() as f64;
    analysis.adult_score = frames.iter().map(|f| f.adult_score).sum::<f64>() / n;
    analysis.violence_score = frames.iter().map(|f| f.violence_score).sum::<f64>() / n;
    analysis.racy_score = frames.iter().map(|f| f.racy_score).sum::<f64>() / n;
    analysis.medical_score = frames.iter().map(|f| f.medical_score).sum::<f64>() / n;
    analysis.confidence = frames.iter().map(|f| f.confidence).sum::<f64>() / n;
    analysis.quality.sharpness = frames.iter().map(|f| f.quality.sharpness).sum::<f64>() / n;
    analysis.quality.brightness = frames.iter().map(|f| f.quality.brightness).sum::<f64>() / n;

    analysis.risk_score = risk_score(
        analysis.adult_score,
        analysis.violence_score,
        analysis.racy_score,
        analysis.medical_score,
    );

    let first = &frames[0];
    analysis.adult_category =
        (!first.adult_category.is_empty()).then(|| first.adult_category.clone());
    analysis.language = (!first.language.is_empty()).then(|| first.language.clone());
    analysis.sentiment = first.sentiment;

    analysis.face_count = frames.iter().map(|f| f.face_count).max().unwrap_or(0);
    for frame in frames {
        for object in &frame.objects {
            if !analysis.objects.contains(object) {
                analysis.objects.push(object.clone());
            }
        }
    }

    analysis
}
