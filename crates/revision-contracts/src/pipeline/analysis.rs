use serde::{Deserialize, Serialize};

/// How an [`AnalysisResult`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Decoded from the JSON schema the analysis prompt asks for.
    Structured,
    /// Recovered from free text by keyword extraction.
    Heuristic,
    /// Synthesized locally without a model response.
    Fallback,
}

/// Output of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub identified_objects: Vec<String>,
    pub editing_prompt: String,
    confidence: f64,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_notes: Option<String>,
    pub source: AnalysisSource,
}

impl AnalysisResult {
    pub fn new(
        identified_objects: Vec<String>,
        editing_prompt: impl Into<String>,
        confidence: f64,
        source: AnalysisSource,
    ) -> Self {
        Self {
            identified_objects,
            editing_prompt: editing_prompt.into(),
            confidence: clamp_confidence(confidence),
            processing_time_ms: 0,
            technical_notes: None,
            source,
        }
    }

    pub fn with_technical_notes(mut self, notes: Option<String>) -> Self {
        self.technical_notes = notes.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_processing_time_ms(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
