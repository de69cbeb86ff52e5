use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Confidence blends alignment quality with response coverage.
pub const SCORE_WEIGHT: f64 = 0.7;
pub const COVERAGE_WEIGHT: f64 = 0.3;

/// A field must reach this share of the best relative score to be
/// recommended outright.
pub const SIGNIFICANT_RELATIVE_THRESHOLD: f64 = 50.0;

pub const CONFIDENCE_VERY_HIGH: f64 = 85.0;
pub const CONFIDENCE_HIGH: f64 = 70.0;
pub const CONFIDENCE_LOW: f64 = 40.0;

/// How many ranked fields to fall back to when nothing is significant.
pub const FALLBACK_RECOMMENDATION_COUNT: usize = 3;

pub const FALLBACK_STRENGTH: &str = "General Aptitude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "multiple-choice")]
    MultipleChoice,
    #[serde(rename = "true-false")]
    TrueFalse,
    #[serde(rename = "scale")]
    Scale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub text: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub career_fields: Vec<String>,
}

impl QuestionOption {
    /// Options with no score (or an explicit zero) still contribute one point.
    fn effective_score(&self) -> f64 {
        match self.score {
            Some(s) if s != 0.0 => s,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<QuestionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub response: String,
}

/// Per-field totals from a single pass over the answers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAggregates {
    pub raw_score: BTreeMap<String, f64>,
    pub response_count: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestMatch {
    pub field: String,
    pub confidence_score: i64,
    pub confidence_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDetails {
    pub aptitude_scores: BTreeMap<String, f64>,
    pub normalized_scores: BTreeMap<String, f64>,
    pub relative_scores: BTreeMap<String, f64>,
    pub confidence_scores: BTreeMap<String, f64>,
    pub response_counts: BTreeMap<String, i64>,
    pub insights: Vec<String>,
    pub all_fields: Vec<String>,
    // Older readers look for the best match here instead of the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_match: Option<BestMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub summary: String,
    pub recommended_fields: Vec<String>,
    pub strengths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_match: Option<BestMatch>,
    pub details: ResultDetails,
}

/// Sum option scores and response counts per declared career field.
///
/// Answers referencing an unknown question or option value are skipped:
/// the catalog may have been edited while the attempt was in flight, and a
/// stale answer should not sink the whole submission. Fields not declared
/// on the test never gain entries, even if an option names them.
pub fn aggregate(fields: &[String], questions: &[Question], answers: &[Answer]) -> FieldAggregates {
    let mut raw_score: BTreeMap<String, f64> = BTreeMap::new();
    let mut response_count: BTreeMap<String, i64> = BTreeMap::new();
    for field in fields {
        raw_score.insert(field.clone(), 0.0);
        response_count.insert(field.clone(), 0);
    }

    for answer in answers {
        let Some(question) = questions.iter().find(|q| q.id == answer.question_id) else {
            continue;
        };
        let Some(option) = question.options.iter().find(|o| o.value == answer.response) else {
            continue;
        };
        for field in &option.career_fields {
            let (Some(total), Some(count)) = (raw_score.get_mut(field), response_count.get_mut(field))
            else {
                continue;
            };
            *total += option.effective_score();
            *count += 1;
        }
    }

    FieldAggregates {
        raw_score,
        response_count,
    }
}

fn confidence_level(confidence: f64) -> &'static str {
    if confidence >= CONFIDENCE_VERY_HIGH {
        "Very High"
    } else if confidence >= CONFIDENCE_HIGH {
        "High"
    } else if confidence <= CONFIDENCE_LOW {
        "Low"
    } else {
        "Medium"
    }
}

/// Turn raw aggregates into ranked, comparable scores and the final
/// recommendation record.
///
/// Normalizing by response count keeps a field from winning purely because
/// more of its questions were answered. Both denominators are floored at 1
/// so an all-zero submission degrades to all-zero scores instead of NaN.
/// The ranking sort is stable; tied confidences keep the declared field
/// order.
pub fn finalize(fields: &[String], agg: &FieldAggregates) -> TestResults {
    let mut normalized_scores: BTreeMap<String, f64> = BTreeMap::new();
    let mut relative_scores: BTreeMap<String, f64> = BTreeMap::new();
    let mut confidence_scores: BTreeMap<String, f64> = BTreeMap::new();

    for field in fields {
        let raw = agg.raw_score.get(field).copied().unwrap_or(0.0);
        let count = agg.response_count.get(field).copied().unwrap_or(0);
        let normalized = if count > 0 { raw / count as f64 } else { 0.0 };
        normalized_scores.insert(field.clone(), normalized);
    }

    let max_norm = normalized_scores
        .values()
        .fold(1.0_f64, |acc, v| acc.max(*v));
    for field in fields {
        let normalized = normalized_scores.get(field).copied().unwrap_or(0.0);
        relative_scores.insert(field.clone(), (normalized / max_norm) * 100.0);
    }

    let max_responses = agg
        .response_count
        .values()
        .fold(1_i64, |acc, v| acc.max(*v)) as f64;
    for field in fields {
        let relative = relative_scores.get(field).copied().unwrap_or(0.0);
        let count = agg.response_count.get(field).copied().unwrap_or(0) as f64;
        let coverage_ratio = count / max_responses;
        confidence_scores.insert(
            field.clone(),
            relative * SCORE_WEIGHT + coverage_ratio * 100.0 * COVERAGE_WEIGHT,
        );
    }

    let mut ranked: Vec<(&String, f64)> = fields
        .iter()
        .map(|f| (f, confidence_scores.get(f).copied().unwrap_or(0.0)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let all_fields: Vec<String> = ranked.iter().map(|(f, _)| (*f).clone()).collect();

    let significant_fields: Vec<String> = ranked
        .iter()
        .filter(|(f, _)| {
            relative_scores.get(f.as_str()).copied().unwrap_or(0.0)
                >= SIGNIFICANT_RELATIVE_THRESHOLD
        })
        .map(|(f, _)| (*f).clone())
        .collect();

    let recommended_fields: Vec<String> = if significant_fields.is_empty() {
        all_fields
            .iter()
            .take(FALLBACK_RECOMMENDATION_COUNT)
            .cloned()
            .collect()
    } else {
        significant_fields
    };

    let mut strengths: Vec<String> = recommended_fields.iter().take(3).cloned().collect();
    if strengths.is_empty() {
        strengths.push(FALLBACK_STRENGTH.to_string());
    }

    let best_match = ranked.first().map(|(field, confidence)| BestMatch {
        field: (*field).clone(),
        confidence_score: confidence.round() as i64,
        confidence_level: confidence_level(*confidence).to_string(),
    });

    let mut insights: Vec<String> = Vec::new();
    let summary = match &best_match {
        Some(best) => {
            insights.push(format!(
                "Your responses show a strong alignment with careers in {}.",
                best.field
            ));
            insights.push(format!(
                "You demonstrate particular strength in areas related to {}.",
                strengths
                    .iter()
                    .take(2)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" and ")
            ));
            if all_fields.len() >= 2 {
                insights.push(format!(
                    "Consider exploring educational pathways related to {} and {}.",
                    all_fields[0], all_fields[1]
                ));
            }
            format!(
                "Based on your responses, {} appears to be your strongest career match with {} confidence ({}%). This aligns well with your preferences and demonstrated interests.",
                best.field,
                best.confidence_level.to_lowercase(),
                best.confidence_score
            )
        }
        None => {
            "Your responses did not map onto any career fields for this test, so no best match could be determined.".to_string()
        }
    };

    TestResults {
        summary,
        recommended_fields,
        strengths,
        best_match: best_match.clone(),
        details: ResultDetails {
            aptitude_scores: agg.raw_score.clone(),
            normalized_scores,
            relative_scores,
            confidence_scores,
            response_counts: agg.response_count.clone(),
            insights,
            all_fields,
            best_match,
        },
    }
}

/// Percentage of answered questions with a defined correct answer that were
/// answered correctly. `None` when no answered question defines one, so
/// interest-style tests stay unscored.
pub fn correctness_score(questions: &[Question], answers: &[Answer]) -> Option<f64> {
    let mut correct: u32 = 0;
    let mut possible: u32 = 0;

    for answer in answers {
        let Some(question) = questions.iter().find(|q| q.id == answer.question_id) else {
            continue;
        };
        let Some(expected) = question.correct_answer.as_deref() else {
            continue;
        };
        possible += 1;
        if expected == answer.response {
            correct += 1;
        }
    }

    if possible > 0 {
        Some(f64::from(correct) / f64::from(possible) * 100.0)
    } else {
        None
    }
}
