use std::io::Cursor;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{ModelClient, ModelRequest};
use crate::errors::ClientError;

const DRYRUN_IMAGE_SIDE: u32 = 64;

/// Offline client with deterministic output, for local runs and demos.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunClient;

#[async_trait]
impl ModelClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn analyze(&self, request: &ModelRequest) -> Result<String, ClientError> {
        let editing_prompt = if request.prompt.starts_with("No areas were marked") {
            "Enhance exposure, color balance and sharpness across the whole photo."
        } else {
            "Remove the objects inside the marked areas and fill them with the surrounding background."
        };
        let answer = json!({
            "identifiedObjects": ["marked object"],
            "editingPrompt": editing_prompt,
            "confidence": 0.5,
            "technicalNotes": format!("dryrun {} on {} input bytes", short_id(&request.prompt), request.image.len()),
        });
        Ok(answer.to_string())
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Vec<u8>, ClientError> {
        render_dryrun_png(&request.prompt, DRYRUN_IMAGE_SIDE, DRYRUN_IMAGE_SIDE)
    }
}

fn render_dryrun_png(prompt: &str, width: u32, height: u32) -> Result<Vec<u8>, ClientError> {
    let (r, g, b) = color_from_prompt(prompt);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| ClientError::InvalidResponse(format!("dryrun PNG encode failed: {err}")))?;
    Ok(encoded.into_inner())
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
