use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::pipeline::{MarkedArea, PipelineResult, ProcessingContext};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// What the caller asked for, as recorded in a receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptRequest<'a> {
    pub source_image: &'a Path,
    pub source_bytes: usize,
    pub marked_areas: &'a [MarkedArea],
    pub context: &'a ProcessingContext,
}

pub fn build_receipt(
    request: &ReceiptRequest<'_>,
    result: &PipelineResult,
    output_image: &Path,
    receipt_path: &Path,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );
    root.insert(
        "analysis".to_string(),
        serde_json::to_value(result.analysis()).unwrap_or(Value::Null),
    );
    root.insert(
        "analysis_prompt".to_string(),
        Value::String(result.analysis_prompt().to_string()),
    );
    root.insert(
        "metadata".to_string(),
        serde_json::to_value(result.metadata()).unwrap_or(Value::Null),
    );
    root.insert(
        "processing_time_ms".to_string(),
        Value::Number(result.processing_time_ms().into()),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "image_path".to_string(),
        Value::String(output_image.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "image_bytes".to_string(),
        Value::Number((result.generated_image().len() as u64).into()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Drops inline image payloads and credentials that may ride along in
/// free-form model parameters.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "inline_data" | "inlinedata" | "data" | "api_key" | "key"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
