//! Qualification scorer: weighted rubric, 0–100 total.
//!
//! The model judges points per criterion; everything after that is local:
//! each criterion is clamped to its maximum, the sum is normalized to 100,
//! and the label comes from fixed thresholds. A failed call yields a neutral
//! `50 / warm` breakdown flagged as a fallback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contacts::model::render_history;
use crate::contacts::tags::{HOT_THRESHOLD, WARM_THRESHOLD};
use crate::contacts::{ExtractedContext, Message, MessageRole};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_json};

const SCORE_MAX_TOKENS: u32 = 600;
const SCORE_TEMPERATURE: f32 = 0.0;

/// Score reported when the scorer cannot reach a judgement.
pub const FALLBACK_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationLabel {
    Hot,
    Warm,
    Cold,
    Unqualified,
}

impl QualificationLabel {
    /// `None` is unqualified; any defined score gets a tier, including 0.
    pub fn from_score(score: Option<u8>) -> Self {
        match score {
            None => Self::Unqualified,
            Some(s) if s >= HOT_THRESHOLD => Self::Hot,
            Some(s) if s >= WARM_THRESHOLD => Self::Warm,
            Some(_) => Self::Cold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Unqualified => "unqualified",
        }
    }
}

impl fmt::Display for QualificationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rubric line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    pub description: String,
    pub max_points: u8,
}

impl Criterion {
    pub fn new(key: &str, description: &str, max_points: u8) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            max_points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    /// Budget / Authority / Need / Timing, 25 points each.
    pub fn bant() -> Self {
        Self {
            criteria: vec![
                Criterion::new("budget", "Has money allocated or can state a price range", 25),
                Criterion::new("authority", "Is, or has access to, the decision maker", 25),
                Criterion::new("need", "Has a concrete problem our offer solves", 25),
                Criterion::new("timing", "Intends to act within a defined time frame", 25),
            ],
        }
    }

    pub fn max_total(&self) -> u32 {
        self.criteria.iter().map(|c| u32::from(c.max_points)).sum()
    }
}

impl Default for Rubric {
    fn default() -> Self {
        Self::bant()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub key: String,
    pub points: u8,
    pub max_points: u8,
    pub rationale: String,
}

/// Per-criterion points, the normalized total, and its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub criteria: Vec<CriterionScore>,
    /// 0–100, unset when there was nothing to score.
    pub total: Option<u8>,
    pub label: QualificationLabel,
    pub summary: String,
    /// True when the neutral default was used instead of a judgement.
    pub fallback: bool,
}

impl ScoreBreakdown {
    pub fn fallback(rubric: &Rubric) -> Self {
        Self {
            criteria: rubric
                .criteria
                .iter()
                .map(|c| CriterionScore {
                    key: c.key.clone(),
                    points: c.max_points / 2,
                    max_points: c.max_points,
                    rationale: String::new(),
                })
                .collect(),
            total: Some(FALLBACK_SCORE),
            label: QualificationLabel::Warm,
            summary: String::new(),
            fallback: true,
        }
    }

    fn unqualified() -> Self {
        Self {
            criteria: Vec::new(),
            total: None,
            label: QualificationLabel::Unqualified,
            summary: "No lead messages or known facts yet".into(),
            fallback: false,
        }
    }

    /// Clamp judged points to the rubric and normalize to 0–100.
    pub fn from_judgements(
        rubric: &Rubric,
        judgements: &HashMap<String, CriterionJudgement>,
        summary: String,
    ) -> Self {
        let max_total = rubric.max_total();
        if max_total == 0 {
            return Self::fallback(rubric);
        }

        let criteria: Vec<CriterionScore> = rubric
            .criteria
            .iter()
            .map(|c| {
                let judged = judgements.get(&c.key);
                let raw = judged.map(|j| j.points).unwrap_or(0.0);
                let points = if raw.is_finite() {
                    raw.round().clamp(0.0, f64::from(c.max_points)) as u8
                } else {
                    0
                };
                CriterionScore {
                    key: c.key.clone(),
                    points,
                    max_points: c.max_points,
                    rationale: judged.map(|j| j.rationale.clone()).unwrap_or_default(),
                }
            })
            .collect();

        let sum: u32 = criteria.iter().map(|c| u32::from(c.points)).sum();
        let total = ((sum * 100 + max_total / 2) / max_total).min(100) as u8;

        Self {
            criteria,
            total: Some(total),
            label: QualificationLabel::from_score(Some(total)),
            summary,
            fallback: false,
        }
    }
}

/// The model's verdict for one criterion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CriterionJudgement {
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    scores: HashMap<String, CriterionJudgement>,
    #[serde(default)]
    summary: String,
}

pub struct QualificationScorer {
    llm: Arc<dyn LlmProvider>,
    rubric: Rubric,
}

impl QualificationScorer {
    pub fn new(llm: Arc<dyn LlmProvider>, rubric: Rubric) -> Self {
        Self { llm, rubric }
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Score a lead from its conversation and merged context.
    ///
    /// With no inbound messages and no known facts the lead is `unqualified`
    /// and the model is not called.
    pub async fn score(&self, history: &[Message], context: &ExtractedContext) -> ScoreBreakdown {
        let has_signal =
            history.iter().any(|m| m.role == MessageRole::Inbound) || !context.is_empty();
        if !has_signal {
            return ScoreBreakdown::unqualified();
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_score_system_prompt(&self.rubric)),
            ChatMessage::user(build_score_user_prompt(history, context)),
        ])
        .with_temperature(SCORE_TEMPERATURE)
        .with_max_tokens(SCORE_MAX_TOKENS);

        match complete_json::<ScoreResponse>(self.llm.as_ref(), request).await {
            Ok(response) if response.scores.is_empty() => {
                warn!("Scorer returned no criteria, using neutral score");
                ScoreBreakdown::fallback(&self.rubric)
            }
            Ok(response) => {
                let breakdown = ScoreBreakdown::from_judgements(
                    &self.rubric,
                    &response.scores,
                    response.summary.trim().to_string(),
                );
                debug!(total = ?breakdown.total, label = %breakdown.label, "Lead scored");
                breakdown
            }
            Err(e) => {
                warn!(error = %e, "Qualification scoring failed, using neutral score");
                ScoreBreakdown::fallback(&self.rubric)
            }
        }
    }
}

fn build_score_system_prompt(rubric: &Rubric) -> String {
    let mut prompt = String::from(
        "You score sales lead qualification against a fixed rubric.\n\n\
         Criteria (award whole points from 0 up to the maximum):\n",
    );
    for c in &rubric.criteria {
        prompt.push_str(&format!("- {} (max {}): {}\n", c.key, c.max_points, c.description));
    }
    prompt.push_str(
        "\nAward points only for evidence in the conversation or known facts; absence of evidence is 0.\n\
         Return ONLY a JSON object:\n\
         {\"scores\": {\"<criterion>\": {\"points\": <int>, \"rationale\": \"...\"}}, \"summary\": \"one sentence\"}",
    );
    prompt
}

fn build_score_user_prompt(history: &[Message], context: &ExtractedContext) -> String {
    format!(
        "Known facts:\n{}\n\nConversation:\n{}",
        context.render(),
        render_history(history, 300)
    )
}
