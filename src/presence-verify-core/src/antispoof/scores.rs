//! Normalized liveness scores and the acceptance policy.

use serde::{Deserialize, Serialize};

/// Number of analytical layers.
pub const LAYER_COUNT: usize = 8;

/// One analytical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoofLayer {
    /// Live subject rather than a replayed image.
    Liveness,
    /// Mask or occlusion over the face.
    MaskOcclusion,
    /// Synthetic media or deepfake artifacts.
    SyntheticMedia,
    /// Head pose plausibility.
    Pose,
    /// Lighting consistency.
    Lighting,
    /// Depth cues (flat photo of a photo).
    Depth,
    /// Expression naturalness.
    Expression,
    /// Age plausibility against the reference.
    AgePlausibility,
}

impl SpoofLayer {
    /// All layers, in reporting order.
    pub const ALL: [SpoofLayer; LAYER_COUNT] = [
        Self::Liveness,
        Self::MaskOcclusion,
        Self::SyntheticMedia,
        Self::Pose,
        Self::Lighting,
        Self::Depth,
        Self::Expression,
        Self::AgePlausibility,
    ];
}

/// Score of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerScore {
    /// Score in [0, 1], higher is more genuine.
    pub score: f64,
    /// Whether the layer passed its own bar.
    pub passed: bool,
}

/// Per-layer scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LayerScores {
    /// Liveness.
    pub liveness: LayerScore,
    /// Mask or occlusion.
    #[serde(alias = "maskOcclusion")]
    pub mask_occlusion: LayerScore,
    /// Synthetic media.
    #[serde(alias = "syntheticMedia", alias = "deepfake")]
    pub synthetic_media: LayerScore,
    /// Pose.
    pub pose: LayerScore,
    /// Lighting.
    pub lighting: LayerScore,
    /// Depth.
    pub depth: LayerScore,
    /// Expression naturalness.
    pub expression: LayerScore,
    /// Age plausibility.
    #[serde(alias = "agePlausibility")]
    pub age_plausibility: LayerScore,
}

impl LayerScores {
    /// Every layer with the same score and outcome.
    #[must_use]
    pub fn uniform(score: f64, passed: bool) -> Self {
        let s = LayerScore { score, passed };
        Self {
            liveness: s,
            mask_occlusion: s,
            synthetic_media: s,
            pose: s,
            lighting: s,
            depth: s,
            expression: s,
            age_plausibility: s,
        }
    }

    /// Score of one layer.
    #[must_use]
    pub fn get(&self, layer: SpoofLayer) -> LayerScore {
        match layer {
            SpoofLayer::Liveness => self.liveness,
            SpoofLayer::MaskOcclusion => self.mask_occlusion,
            SpoofLayer::SyntheticMedia => self.synthetic_media,
            SpoofLayer::Pose => self.pose,
            SpoofLayer::Lighting => self.lighting,
            SpoofLayer::Depth => self.depth,
            SpoofLayer::Expression => self.expression,
            SpoofLayer::AgePlausibility => self.age_plausibility,
        }
    }

    /// Mutable score of one layer.
    pub fn get_mut(&mut self, layer: SpoofLayer) -> &mut LayerScore {
        match layer {
            SpoofLayer::Liveness => &mut self.liveness,
            SpoofLayer::MaskOcclusion => &mut self.mask_occlusion,
            SpoofLayer::SyntheticMedia => &mut self.synthetic_media,
            SpoofLayer::Pose => &mut self.pose,
            SpoofLayer::Lighting => &mut self.lighting,
            SpoofLayer::Depth => &mut self.depth,
            SpoofLayer::Expression => &mut self.expression,
            SpoofLayer::AgePlausibility => &mut self.age_plausibility,
        }
    }

    /// Layers with their scores, in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = (SpoofLayer, LayerScore)> + '_ {
        SpoofLayer::ALL.into_iter().map(|l| (l, self.get(l)))
    }

    /// How many layers passed.
    #[must_use]
    pub fn passed_count(&self) -> u8 {
        self.iter().filter(|(_, s)| s.passed).count() as u8
    }
}

/// Provider recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    /// Genuine.
    #[serde(alias = "approve")]
    Approve,
    /// Needs a human.
    #[serde(alias = "review")]
    Review,
    /// Spoof.
    #[serde(alias = "reject")]
    Reject,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Approve => "APPROVE",
            Self::Review => "REVIEW",
            Self::Reject => "REJECT",
        })
    }
}

/// Normalized result of one anti-spoofing analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoofScores {
    /// Per-layer breakdown.
    pub layers: LayerScores,
    /// Aggregate score in [0, 1].
    #[serde(alias = "overallScore")]
    pub overall_score: f64,
    /// Layers that passed.
    #[serde(alias = "passedLayers")]
    pub passed_layers: u8,
    /// Recommendation.
    pub recommendation: Recommendation,
    /// Face match against the reference photo, when one was supplied.
    #[serde(default, alias = "faceMatchConfidence", skip_serializing_if = "Option::is_none")]
    pub face_match_confidence: Option<f64>,
    /// Flagged for human review.
    #[serde(default, alias = "manualReview")]
    pub manual_review: bool,
    /// Free-form provider notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SpoofScores {
    /// Check ranges and recount passed layers from the per-layer flags.
    ///
    /// A provider's own `passed_layers` is not trusted.
    pub fn normalized(mut self) -> Result<Self, String> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);

        for (layer, s) in self.layers.iter() {
            if !in_unit(s.score) {
                return Err(format!("{layer:?} score {} outside [0, 1]", s.score));
            }
        }
        if !in_unit(self.overall_score) {
            return Err(format!("overall score {} outside [0, 1]", self.overall_score));
        }
        if let Some(c) = self.face_match_confidence {
            if !in_unit(c) {
                return Err(format!("face match confidence {c} outside [0, 1]"));
            }
        }

        self.passed_layers = self.layers.passed_count();
        Ok(self)
    }
}

/// Thresholds a result is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBar {
    /// Minimum overall score.
    pub score_threshold: f64,
    /// Minimum passed layers.
    pub min_passed_layers: u8,
}

/// Outcome of [`AntiSpoofPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiSpoofDecision {
    /// Whether all three conditions held.
    pub accepted: bool,
    /// Conditions that failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Acceptance rule: score, layer count and recommendation must all pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AntiSpoofPolicy;

impl AntiSpoofPolicy {
    /// Judge `scores` against `bar`.
    #[must_use]
    pub fn evaluate(&self, scores: &SpoofScores, bar: &AcceptanceBar) -> AntiSpoofDecision {
        let mut failures = Vec::new();
        if scores.overall_score < bar.score_threshold {
            failures.push(format!(
                "overall score {:.2} below threshold {:.2}",
                scores.overall_score, bar.score_threshold
            ));
        }
        if scores.passed_layers < bar.min_passed_layers {
            failures.push(format!(
                "{} layers passed, {} required",
                scores.passed_layers, bar.min_passed_layers
            ));
        }
        if scores.recommendation != Recommendation::Approve {
            failures.push(format!("recommendation {}", scores.recommendation));
        }
        AntiSpoofDecision {
            accepted: failures.is_empty(),
            failures,
        }
    }
}
