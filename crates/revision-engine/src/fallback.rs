use revision_contracts::failure::FailureKind;
use revision_contracts::pipeline::{
    AnalysisResult, AnalysisSource, PipelineMetadata, PipelineResult,
};

use crate::errors::truncate_text;

const FAILURE_REASON_MAX_CHARS: usize = 500;

/// Instruction used when no model output is available.
pub fn fallback_prompt(marked_area_count: usize) -> String {
    match marked_area_count {
        0 => "Enhance the overall photo: balance exposure and color, and sharpen details \
while keeping every object in place."
            .to_string(),
        1 => "Remove the object in the marked area and fill the space so it blends \
naturally with the surrounding background."
            .to_string(),
        count => format!(
            "Remove the objects in the {count} marked areas and fill each space so it \
blends naturally with the surrounding background."
        ),
    }
}

/// Degraded result for a request whose model stages could not complete.
/// The generated image is the untouched original so callers always get a
/// displayable payload.
pub fn fallback(
    original_image: Vec<u8>,
    marked_area_count: usize,
    failure_reason: &str,
    kind: FailureKind,
    processing_time_ms: u64,
    mut metadata: PipelineMetadata,
) -> PipelineResult {
    let analysis = AnalysisResult::new(
        Vec::new(),
        fallback_prompt(marked_area_count),
        0.0,
        AnalysisSource::Fallback,
    )
    .with_technical_notes(Some(format!(
        "Model stages unavailable ({kind}); returning the original photo."
    )))
    .with_processing_time_ms(processing_time_ms);

    metadata.is_fallback = true;
    metadata.failure_reason = Some(truncate_text(failure_reason.trim(), FAILURE_REASON_MAX_CHARS));
    metadata.failure_kind = Some(kind);
    metadata.marked_area_count = marked_area_count;

    let generated_image = original_image.clone();
    PipelineResult::new(
        original_image,
        analysis,
        generated_image,
        processing_time_ms,
        metadata,
    )
}
