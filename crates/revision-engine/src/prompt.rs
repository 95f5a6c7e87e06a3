//! Deterministic prompt rendering. Output depends only on the arguments, so
//! identical inputs always produce byte-identical prompts.

use revision_contracts::pipeline::{AnalysisResult, MarkedArea};

pub const ANALYSIS_SYSTEM_INSTRUCTION: &str = "You are an expert photo retoucher. \
You look at a photo and the regions a user marked on it, and you write precise \
instructions for an image editing model.";

pub const RESPONSE_SCHEMA: &str = r#"{"identifiedObjects": ["string"], "editingPrompt": "string", "confidence": 0.0, "technicalNotes": "string"}"#;

const INSTRUCTIONS_MAX_CHARS: usize = 1000;

/// Stage A prompt: the marked areas plus the user's own words.
pub fn build_analysis_prompt(marked_areas: &[MarkedArea], user_instructions: Option<&str>) -> String {
    let mut lines: Vec<String> = Vec::new();
    if marked_areas.is_empty() {
        lines.push(
            "No areas were marked on the attached photo. Suggest one global enhancement: \
improve exposure, color balance and sharpness while keeping every object in place."
                .to_string(),
        );
    } else {
        lines.push(format!(
            "The user marked {} on the attached photo. Coordinates are percentages of the image width and height, measured from the top-left corner.",
            count_phrase(marked_areas.len())
        ));
        for (idx, area) in marked_areas.iter().enumerate() {
            lines.push(describe_area(idx + 1, area));
        }
        lines.push(
            "Identify the object inside each marked area. Write one editing instruction that \
removes those objects and fills the space so it blends with the surrounding background. \
Everything outside the marked areas must stay unchanged."
                .to_string(),
        );
    }

    if let Some(instructions) = normalize_instructions(user_instructions) {
        lines.push(format!("User instructions: {instructions}"));
    }

    lines.push(format!(
        "Respond with JSON only, without markdown, using this schema:\n{RESPONSE_SCHEMA}"
    ));
    lines.join("\n")
}

/// Stage B prompt derived from the analysis output.
pub fn build_generation_prompt(analysis: &AnalysisResult) -> String {
    let mut lines = vec![format!(
        "Edit the provided photo. {}",
        analysis.editing_prompt.trim()
    )];
    let objects = analysis
        .identified_objects
        .iter()
        .map(|object| object.trim())
        .filter(|object| !object.is_empty())
        .collect::<Vec<&str>>();
    if !objects.is_empty() {
        lines.push(format!("Objects to change: {}.", objects.join(", ")));
    }
    lines.push(
        "Keep the rest of the photo unchanged and preserve the original lighting, perspective \
and resolution. Return only the edited image."
            .to_string(),
    );
    lines.join("\n")
}

fn describe_area(position: usize, area: &MarkedArea) -> String {
    let (center_x, center_y) = area.center();
    let mut line = format!(
        "{position}. Area at x={}%, y={}%, width {}%, height {}% (center {}%, {}%).",
        percent(area.x()),
        percent(area.y()),
        percent(area.width()),
        percent(area.height()),
        percent(center_x),
        percent(center_y),
    );
    if let Some(description) = area.description() {
        line.push_str(&format!(" User note: \"{description}\"."));
    }
    line
}

fn count_phrase(count: usize) -> String {
    if count == 1 {
        "1 area".to_string()
    } else {
        format!("{count} areas")
    }
}

fn percent(value: f64) -> String {
    format!("{:.1}", value * 100.0)
}

fn normalize_instructions(raw: Option<&str>) -> Option<String> {
    let collapsed = raw?.split_whitespace().collect::<Vec<&str>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(INSTRUCTIONS_MAX_CHARS).collect())
}
