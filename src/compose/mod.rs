//! Response composition
//!
//! Builds the evidence-plus-context payload for a query and turns it into a
//! response, through the text generator or the extractive summary.

mod extractive;
mod generator;
mod insights;

pub use extractive::{extractive_summary, value_counts, NO_DATA_MESSAGE};
pub use generator::{GenerationError, OpenAiCompatGenerator, TextGenerator};
pub use insights::{insights, NO_RESULTS_INSIGHT};

use crate::entities::QueryIntent;
use crate::error::{MemoragError, Result};
use crate::retrieval::RankedResult;
use crate::session::SessionContext;
use crate::storage::ObservationValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How responses are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Text generator writes the answer from the payload
    Generated,
    /// Deterministic summary of the evidence
    Extractive,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Generated => "generated",
            ResponseMode::Extractive => "extractive",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = MemoragError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generated" | "llm" => Ok(ResponseMode::Generated),
            "extractive" | "basic" => Ok(ResponseMode::Extractive),
            other => Err(MemoragError::InvalidConfigValue {
                path: "response.mode".to_string(),
                message: format!("unknown response mode '{}'", other),
            }),
        }
    }
}

/// One ranked record as shown to the generator
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceLine {
    pub rank: usize,
    pub company: String,
    pub ticker: String,
    pub year: i32,
    pub indicator_code: String,
    pub indicator_name: String,
    pub value: ObservationValue,
    pub composite: f32,
}

impl fmt::Display for EvidenceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quality = if self.value.is_missing() { "missing" } else { "valid" };
        write!(
            f,
            "{}. [{}] {} ({}) {} - {} ({}): {} [score {:.2}]",
            self.rank,
            quality,
            self.company,
            self.ticker,
            self.year,
            self.indicator_name,
            self.indicator_code,
            self.value,
            self.composite
        )
    }
}

/// Everything the response is built from
#[derive(Debug, Clone, Serialize)]
pub struct PromptPayload {
    pub query: String,
    pub intent: QueryIntent,
    pub evidence: Vec<EvidenceLine>,
    /// Prior turn's resolved entities, or "none"
    pub context_summary: String,
    pub valid_count: usize,
    pub missing_count: usize,
    pub prompt: String,
}

/// Response text with the strategy that actually produced it
#[derive(Debug, Clone, Serialize)]
pub struct ComposedResponse {
    pub text: String,
    pub strategy: ResponseMode,
    /// Set when generation failed and the extractive summary was used
    pub fallback_reason: Option<String>,
}

pub struct ResponseComposer {
    mode: ResponseMode,
    generator: Option<Box<dyn TextGenerator>>,
    evidence_top_n: usize,
}

impl ResponseComposer {
    pub fn new(
        mode: ResponseMode,
        generator: Option<Box<dyn TextGenerator>>,
        evidence_top_n: usize,
    ) -> Self {
        let mode = if mode == ResponseMode::Generated && generator.is_none() {
            tracing::warn!("No text generator available, using extractive responses");
            ResponseMode::Extractive
        } else {
            mode
        };
        Self {
            mode,
            generator,
            evidence_top_n: evidence_top_n.max(1),
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Switch between generated and extractive responses
    pub fn toggle_mode(&mut self) -> Result<ResponseMode> {
        self.mode = match self.mode {
            ResponseMode::Extractive => {
                if self.generator.is_none() {
                    return Err(MemoragError::ExternalServiceUnavailable {
                        service: "text generation".to_string(),
                        message: "no generator configured; set [llm] enabled and the API key"
                            .to_string(),
                    });
                }
                ResponseMode::Generated
            }
            ResponseMode::Generated => ResponseMode::Extractive,
        };
        Ok(self.mode)
    }

    pub fn compose(
        &self,
        query: &str,
        intent: QueryIntent,
        ranked: &[RankedResult],
        session: Option<&SessionContext>,
    ) -> PromptPayload {
        let evidence: Vec<EvidenceLine> = ranked
            .iter()
            .take(self.evidence_top_n)
            .enumerate()
            .map(|(i, r)| EvidenceLine {
                rank: i + 1,
                company: r.record.company.clone(),
                ticker: r.record.ticker.clone(),
                year: r.record.year,
                indicator_code: r.record.indicator_code.clone(),
                indicator_name: r.record.indicator_name.clone(),
                value: r.record.value.clone(),
                composite: r.composite,
            })
            .collect();

        let context_summary = session
            .and_then(|s| s.last_turn())
            .map(|turn| format!("previous question resolved to {}", turn.entities.describe()))
            .unwrap_or_else(|| "none".to_string());

        let (valid_count, missing_count) = value_counts(ranked);
        let prompt = render_prompt(query, intent, &evidence, &context_summary, valid_count, missing_count);

        PromptPayload {
            query: query.to_string(),
            intent,
            evidence,
            context_summary,
            valid_count,
            missing_count,
            prompt,
        }
    }

    /// Produce the response text in the current mode.
    ///
    /// Without evidence the no-data message is returned in every mode; a
    /// generator failure falls back to the extractive summary.
    pub fn respond(&self, payload: &PromptPayload, ranked: &[RankedResult]) -> ComposedResponse {
        let extractive = || extractive_summary(payload.intent, ranked, self.evidence_top_n);

        if ranked.is_empty() || self.mode == ResponseMode::Extractive {
            return ComposedResponse {
                text: extractive(),
                strategy: ResponseMode::Extractive,
                fallback_reason: None,
            };
        }

        let Some(generator) = &self.generator else {
            return ComposedResponse {
                text: extractive(),
                strategy: ResponseMode::Extractive,
                fallback_reason: Some("no generator configured".to_string()),
            };
        };

        match generator.generate(payload) {
            Ok(text) => ComposedResponse {
                text,
                strategy: ResponseMode::Generated,
                fallback_reason: None,
            },
            Err(e) => {
                tracing::warn!("Generation via {} failed, using extractive summary: {}", generator.name(), e);
                ComposedResponse {
                    text: extractive(),
                    strategy: ResponseMode::Extractive,
                    fallback_reason: Some(e.to_string()),
                }
            }
        }
    }
}

fn render_prompt(
    query: &str,
    intent: QueryIntent,
    evidence: &[EvidenceLine],
    context: &str,
    valid: usize,
    missing: usize,
) -> String {
    let lines: Vec<String> = evidence.iter().map(|e| e.to_string()).collect();
    format!(
        "You are an ESG data analyst. Answer the question using only the records below.\n\
         \n\
         Question: {query}\n\
         Intent: {intent}\n\
         Context: {context}\n\
         \n\
         Records, best match first ([valid] has a value, [missing] has none):\n\
         {records}\n\
         \n\
         Data quality: {valid} valid, {missing} missing.\n\
         \n\
         Answer the question directly from the valid records, describe any trend \
         across years, state which requested values are missing, and do not \
         introduce figures that are not listed above.",
        query = query,
        intent = intent,
        context = context,
        records = lines.join("\n"),
        valid = valid,
        missing = missing,
    )
}
