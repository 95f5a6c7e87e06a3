use revision_contracts::pipeline::{AnalysisResult, AnalysisSource};
use serde_json::{Map, Value};

pub const HEURISTIC_CONFIDENCE_CEILING: f64 = 0.8;

const KEYWORD_CONFIDENCE: f64 = 0.6;
const PLAIN_TEXT_CONFIDENCE: f64 = 0.4;
const STRUCTURED_DEFAULT_CONFIDENCE: f64 = 0.85;
const GENERIC_EDITING_PROMPT: &str =
    "Enhance the photo's exposure, color balance and sharpness while keeping its content unchanged.";

const EDIT_STEMS: [&str; 8] = [
    "remov", "eras", "edit", "replac", "delet", "clean", "retouch", "fill",
];
const LEADING_FILLERS: [&str; 6] = ["the", "a", "an", "all", "any", "both"];
const OBJECT_TERMINATORS: [&str; 14] = [
    "and", "from", "with", "in", "on", "at", "so", "to", "then", "that", "which", "using", "by",
    "while",
];
const MAX_OBJECTS: usize = 12;
const MAX_OBJECT_CHARS: usize = 80;
const MAX_OBJECT_WORDS: usize = 4;
const MAX_PROMPT_SENTENCES: usize = 3;
const MAX_PLAIN_PROMPT_CHARS: usize = 400;

/// Best-effort decode of an analysis response. Never fails: JSON matching
/// the requested schema is preferred, anything else goes through keyword
/// extraction at reduced confidence. Only a response that is a JSON object
/// as a whole may score above [`HEURISTIC_CONFIDENCE_CEILING`]; objects
/// recovered from a code fence or surrounding prose are capped at it.
pub fn parse_analysis_response(raw: &str) -> AnalysisResult {
    let trimmed = raw.trim();
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(result) = structured_result(&object, 1.0) {
            return result;
        }
    }

    let text = strip_code_fence(trimmed);
    if text.is_empty() {
        return AnalysisResult::new(
            Vec::new(),
            GENERIC_EDITING_PROMPT,
            0.0,
            AnalysisSource::Heuristic,
        )
        .with_technical_notes(Some("Analysis response was empty.".to_string()));
    }

    if let Some(object) = extract_json_object_from_text(&text) {
        if let Some(result) = structured_result(&object, HEURISTIC_CONFIDENCE_CEILING) {
            return result;
        }
    }
    heuristic_result(&text)
}

fn structured_result(
    object: &Map<String, Value>,
    confidence_ceiling: f64,
) -> Option<AnalysisResult> {
    let editing_prompt = first_non_empty_string(
        object,
        &["editingPrompt", "editing_prompt", "prompt", "instruction"],
    )?;
    let identified_objects = coerce_text_list(
        first_present(object, &["identifiedObjects", "identified_objects", "objects"]),
        MAX_OBJECTS,
        MAX_OBJECT_CHARS,
    );
    let confidence = first_present(object, &["confidence", "score"])
        .and_then(parse_confidence)
        .unwrap_or(STRUCTURED_DEFAULT_CONFIDENCE)
        .min(confidence_ceiling);
    let technical_notes =
        first_non_empty_string(object, &["technicalNotes", "technical_notes", "notes"]);

    Some(
        AnalysisResult::new(
            identified_objects,
            editing_prompt,
            confidence,
            AnalysisSource::Structured,
        )
        .with_technical_notes(technical_notes),
    )
}

fn heuristic_result(text: &str) -> AnalysisResult {
    let sentences: Vec<String> = text
        .split(['.', '!', '?', '\n', ';'])
        .map(|sentence| sentence.split_whitespace().collect::<Vec<&str>>().join(" "))
        .filter(|sentence| !sentence.is_empty())
        .collect();
    let instructions: Vec<&String> = sentences
        .iter()
        .filter(|sentence| sentence.split_whitespace().any(is_edit_keyword))
        .collect();

    if instructions.is_empty() {
        let collapsed = text.split_whitespace().collect::<Vec<&str>>().join(" ");
        let prompt: String = collapsed.chars().take(MAX_PLAIN_PROMPT_CHARS).collect();
        return AnalysisResult::new(
            Vec::new(),
            prompt,
            PLAIN_TEXT_CONFIDENCE,
            AnalysisSource::Heuristic,
        )
        .with_technical_notes(Some(
            "No editing keywords found; response used verbatim.".to_string(),
        ));
    }

    let editing_prompt = instructions
        .iter()
        .take(MAX_PROMPT_SENTENCES)
        .map(|sentence| format!("{sentence}."))
        .collect::<Vec<String>>()
        .join(" ");
    let raw_objects = instructions
        .iter()
        .filter_map(|sentence| object_after_keyword(sentence))
        .map(Value::String)
        .collect::<Vec<Value>>();
    let identified_objects =
        coerce_text_list(Some(&Value::Array(raw_objects)), MAX_OBJECTS, MAX_OBJECT_CHARS);

    AnalysisResult::new(
        identified_objects,
        editing_prompt,
        KEYWORD_CONFIDENCE.min(HEURISTIC_CONFIDENCE_CEILING),
        AnalysisSource::Heuristic,
    )
    .with_technical_notes(Some(
        "Response was not valid JSON; instructions extracted from text.".to_string(),
    ))
}

fn is_edit_keyword(word: &str) -> bool {
    let lowered = word
        .trim_matches(|ch: char| !ch.is_alphanumeric())
        .to_ascii_lowercase();
    if !lowered.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return false;
    }
    // Stem plus a short inflection: "removing", "edited", "cleanup".
    EDIT_STEMS
        .iter()
        .any(|stem| lowered.starts_with(stem) && lowered.len() <= stem.len() + 3)
}

/// "Remove the red car from the street" -> "red car".
fn object_after_keyword(sentence: &str) -> Option<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let start = words.iter().position(|word| is_edit_keyword(word))?;
    let mut picked: Vec<String> = Vec::new();
    for word in &words[start + 1..] {
        let cleaned = word
            .trim_matches(|ch: char| !(ch.is_alphanumeric() || ch == '-'))
            .to_ascii_lowercase();
        if cleaned.is_empty() {
            continue;
        }
        if picked.is_empty() && LEADING_FILLERS.contains(&cleaned.as_str()) {
            continue;
        }
        if OBJECT_TERMINATORS.contains(&cleaned.as_str()) {
            break;
        }
        picked.push(cleaned);
        if picked.len() >= MAX_OBJECT_WORDS || word.ends_with(',') {
            break;
        }
    }
    if picked.is_empty() {
        None
    } else {
        Some(picked.join(" "))
    }
}

fn parse_confidence(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }?;
    if !parsed.is_finite() {
        return None;
    }
    // Some responses use a percentage scale.
    let normalized = if parsed > 1.0 && parsed <= 100.0 {
        parsed / 100.0
    } else {
        parsed
    };
    Some(normalized.clamp(0.0, 1.0))
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn first_non_empty_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

fn extract_json_object_from_text(text: &str) -> Option<Map<String, Value>> {
    let mut candidates = vec![text.to_string()];
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].to_string());
        }
    }
    candidates.into_iter().find_map(|candidate| {
        serde_json::from_str::<Value>(&candidate)
            .ok()
            .and_then(|parsed| parsed.as_object().cloned())
    })
}

fn coerce_text_list(value: Option<&Value>, max_items: usize, max_chars: usize) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let mut raw_items: Vec<String> = Vec::new();
    match value {
        Value::Array(rows) => {
            for row in rows {
                if let Some(text) = row.as_str() {
                    raw_items.push(text.to_string());
                }
            }
        }
        Value::String(text) => {
            raw_items.extend(text.split(',').map(str::to_string));
        }
        _ => {}
    }

    let mut cleaned = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for row in raw_items {
        let mut text = row.split_whitespace().collect::<Vec<&str>>().join(" ");
        if text.is_empty() {
            continue;
        }
        if text.chars().count() > max_chars {
            text = text.chars().take(max_chars).collect::<String>().trim().to_string();
        }
        let key = text.to_ascii_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        cleaned.push(text);
        if cleaned.len() >= max_items {
            break;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use revision_contracts::pipeline::AnalysisSource;

    use super::{parse_analysis_response, HEURISTIC_CONFIDENCE_CEILING};

    #[test]
    fn structured_json_is_decoded() {
        let result = parse_analysis_response(
            r#"{"identifiedObjects": ["person", "Person", "bench"], "editingPrompt": "Remove the person on the bench.", "confidence": 0.92, "technicalNotes": "busy background"}"#,
        );
        assert_eq!(result.source, AnalysisSource::Structured);
        assert_eq!(result.identified_objects, vec!["person", "bench"]);
        assert_eq!(result.editing_prompt, "Remove the person on the bench.");
        assert_eq!(result.confidence(), 0.92);
        assert_eq!(result.technical_notes.as_deref(), Some("busy background"));
    }

    #[test]
    fn fenced_snake_case_json_is_accepted() {
        let raw = "```json\n{\"identified_objects\": \"cone, sign\", \"editing_prompt\": \"Erase the cone.\", \"confidence\": \"45%\"}\n```";
        let result = parse_analysis_response(raw);
        assert_eq!(result.source, AnalysisSource::Structured);
        assert_eq!(result.identified_objects, vec!["cone", "sign"]);
        assert_eq!(result.confidence(), 0.45);

        let confident = parse_analysis_response(
            "```json\n{\"editingPrompt\": \"Erase the cone.\", \"confidence\": 0.97}\n```",
        );
        assert_eq!(confident.confidence(), HEURISTIC_CONFIDENCE_CEILING);
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let raw = "Sure! Here is the analysis: {\"editingPrompt\": \"Replace the sky.\"} Hope it helps.";
        let result = parse_analysis_response(raw);
        assert_eq!(result.source, AnalysisSource::Structured);
        assert_eq!(result.editing_prompt, "Replace the sky.");
        assert_eq!(result.confidence(), HEURISTIC_CONFIDENCE_CEILING);
    }

    #[test]
    fn trailing_garbage_caps_confidence() {
        for raw in [
            "Sure! {\"editingPrompt\": \"Remove the car.\"} hope that helps",
            "{\"editingPrompt\": \"Remove the car.\", \"confidence\": 0.99} trailing",
        ] {
            assert!(serde_json::from_str::<serde_json::Value>(raw).is_err());
            let result = parse_analysis_response(raw);
            assert_eq!(result.source, AnalysisSource::Structured);
            assert_eq!(result.editing_prompt, "Remove the car.");
            assert!(
                result.confidence() <= HEURISTIC_CONFIDENCE_CEILING,
                "{raw} -> {}",
                result.confidence()
            );
        }
    }

    #[test]
    fn strict_json_keeps_default_structured_confidence() {
        let result = parse_analysis_response("  {\"editingPrompt\": \"Replace the sky.\"}\n");
        assert_eq!(result.confidence(), 0.85);
    }

    #[test]
    fn invalid_json_falls_back_to_keywords() {
        let raw = "{\"editingPrompt\": Remove the red car from the street, then fill the gap";
        let result = parse_analysis_response(raw);
        assert_eq!(result.source, AnalysisSource::Heuristic);
        assert!(result.confidence() <= HEURISTIC_CONFIDENCE_CEILING);
        assert!(result.editing_prompt.contains("Remove the red car"));
        assert_eq!(result.identified_objects, vec!["red car"]);
    }

    #[test]
    fn free_text_without_keywords_has_low_confidence() {
        let result = parse_analysis_response("The photo shows a beach at sunset.");
        assert_eq!(result.source, AnalysisSource::Heuristic);
        assert_eq!(result.confidence(), 0.4);
        assert_eq!(result.editing_prompt, "The photo shows a beach at sunset.");
        assert!(result.identified_objects.is_empty());
    }

    #[test]
    fn json_without_prompt_uses_heuristics() {
        let result = parse_analysis_response(r#"{"identifiedObjects": ["tree"]}"#);
        assert_eq!(result.source, AnalysisSource::Heuristic);
        assert!(result.confidence() <= HEURISTIC_CONFIDENCE_CEILING);
    }

    #[test]
    fn empty_input_still_produces_a_result() {
        let result = parse_analysis_response("   \n");
        assert_eq!(result.confidence(), 0.0);
        assert!(!result.editing_prompt.is_empty());
    }

    #[test]
    fn malformed_inputs_never_exceed_heuristic_ceiling() {
        for raw in ["{", "}{", "[1, 2", "```\n```", "null", "42", "{\"confidence\": 1.0}"] {
            let result = parse_analysis_response(raw);
            assert!(
                result.confidence() <= HEURISTIC_CONFIDENCE_CEILING,
                "{raw} -> {}",
                result.confidence()
            );
        }
    }
}
