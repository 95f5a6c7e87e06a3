use image::ImageFormat;
use revision_contracts::failure::ValidationError;
use revision_contracts::pipeline::MarkedArea;
use serde_json::Value;

use crate::config::InputLimits;

const ACCEPTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Bmp,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    pub format: ImageFormat,
    pub marked_areas: Vec<MarkedArea>,
}

impl ValidatedInput {
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Checks raw UI input before any network work. Size is checked before the
/// marked areas, so an oversized image is reported regardless of them.
pub fn validate_request(
    image: &[u8],
    marked_areas: &[Value],
    limits: &InputLimits,
) -> Result<ValidatedInput, ValidationError> {
    let format = validate_image(image, limits)?;
    let marked_areas = parse_marked_areas(marked_areas, limits)?;
    Ok(ValidatedInput {
        format,
        marked_areas,
    })
}

/// Same checks for callers that already hold typed areas.
pub fn validate_typed_request(
    image: &[u8],
    marked_areas: Vec<MarkedArea>,
    limits: &InputLimits,
) -> Result<ValidatedInput, ValidationError> {
    let format = validate_image(image, limits)?;
    check_area_count(marked_areas.len(), limits)?;
    Ok(ValidatedInput {
        format,
        marked_areas,
    })
}

pub fn validate_image(image: &[u8], limits: &InputLimits) -> Result<ImageFormat, ValidationError> {
    if image.is_empty() {
        return Err(ValidationError::EmptyImage);
    }
    if image.len() > limits.max_image_bytes {
        return Err(ValidationError::ImageTooLarge {
            size: image.len(),
            max: limits.max_image_bytes,
        });
    }
    match image::guess_format(image) {
        Ok(format) if ACCEPTED_FORMATS.contains(&format) => Ok(format),
        _ => Err(ValidationError::UnsupportedFormat),
    }
}

pub fn parse_marked_areas(
    raw: &[Value],
    limits: &InputLimits,
) -> Result<Vec<MarkedArea>, ValidationError> {
    check_area_count(raw.len(), limits)?;
    raw.iter()
        .enumerate()
        .map(|(index, entry)| {
            MarkedArea::from_value(entry)
                .map_err(|reason| ValidationError::MarkedAreaInvalid { index, reason })
        })
        .collect()
}

fn check_area_count(count: usize, limits: &InputLimits) -> Result<(), ValidationError> {
    if count > limits.max_marked_areas {
        return Err(ValidationError::TooManyMarkedAreas {
            count,
            max: limits.max_marked_areas,
        });
    }
    Ok(())
}
