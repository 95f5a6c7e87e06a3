use serde::Serialize;

use super::analysis::AnalysisResult;
use super::state::PipelineState;
use crate::failure::FailureKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetadata {
    pub request_id: String,
    pub is_fallback: bool,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub analysis_model: Option<String>,
    pub generation_model: Option<String>,
    pub analysis_attempts: u32,
    pub generation_attempts: u32,
    pub marked_area_count: usize,
    pub state_trail: Vec<PipelineState>,
    pub warnings: Vec<String>,
}

/// Final aggregate handed back to the caller, created once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    original_image: Vec<u8>,
    analysis_prompt: String,
    generated_image: Vec<u8>,
    processing_time_ms: u64,
    analysis: AnalysisResult,
    metadata: PipelineMetadata,
}

impl PipelineResult {
    pub fn new(
        original_image: Vec<u8>,
        analysis: AnalysisResult,
        generated_image: Vec<u8>,
        processing_time_ms: u64,
        metadata: PipelineMetadata,
    ) -> Self {
        Self {
            original_image,
            analysis_prompt: analysis.editing_prompt.clone(),
            generated_image,
            processing_time_ms,
            analysis,
            metadata,
        }
    }

    pub fn original_image(&self) -> &[u8] {
        &self.original_image
    }

    /// The editing instruction the generation stage worked from.
    pub fn analysis_prompt(&self) -> &str {
        &self.analysis_prompt
    }

    pub fn generated_image(&self) -> &[u8] {
        &self.generated_image
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }

    pub fn analysis(&self) -> &AnalysisResult {
        &self.analysis
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.is_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineMetadata, PipelineResult};
    use crate::pipeline::{AnalysisResult, AnalysisSource};

    #[test]
    fn analysis_prompt_mirrors_editing_prompt() {
        let analysis = AnalysisResult::new(
            vec!["lamp post".to_string()],
            "Remove the lamp post.",
            0.9,
            AnalysisSource::Structured,
        );
        let result = PipelineResult::new(
            vec![1, 2, 3],
            analysis,
            vec![4, 5],
            12,
            PipelineMetadata::default(),
        );
        assert_eq!(result.analysis_prompt(), "Remove the lamp post.");
        assert_eq!(result.generated_image(), &[4, 5]);
        assert!(!result.is_fallback());
    }
}
