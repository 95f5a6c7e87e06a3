use serde::Serialize;
use serde_json::Value;

pub const GEOMETRY_KEYS: [&str; 4] = ["x", "y", "width", "height"];

const EDGE_TOLERANCE: f64 = 1e-6;
const DESCRIPTION_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkedAreaError {
    #[error("entry is not an object")]
    NotAnObject,
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("key '{0}' is not a finite number")]
    NotANumber(&'static str),
    #[error("key '{key}' is outside normalized range [0, 1]")]
    OutOfRange { key: &'static str },
    #[error("key '{0}' must be greater than zero")]
    NonPositiveSize(&'static str),
    #[error("area extends past the {0} image edge")]
    ExceedsBounds(&'static str),
}

/// A user-drawn rectangle in normalized `[0, 1]` image space.
///
/// Fields are private so every instance has passed geometry checks; the
/// only way in is [`MarkedArea::new`] or [`MarkedArea::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkedArea {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl MarkedArea {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Result<Self, MarkedAreaError> {
        let x = check_unit("x", x)?;
        let y = check_unit("y", y)?;
        let width = check_unit("width", width)?;
        let height = check_unit("height", height)?;
        if width <= 0.0 {
            return Err(MarkedAreaError::NonPositiveSize("width"));
        }
        if height <= 0.0 {
            return Err(MarkedAreaError::NonPositiveSize("height"));
        }
        if x + width > 1.0 + EDGE_TOLERANCE {
            return Err(MarkedAreaError::ExceedsBounds("right"));
        }
        if y + height > 1.0 + EDGE_TOLERANCE {
            return Err(MarkedAreaError::ExceedsBounds("bottom"));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
            description: None,
        })
    }

    pub fn with_description(mut self, description: impl AsRef<str>) -> Self {
        self.description = normalize_description(description.as_ref());
        self
    }

    /// Parses one raw UI entry such as `{"x":0.1,"y":0.1,"width":0.2,"height":0.2}`.
    pub fn from_value(value: &Value) -> Result<Self, MarkedAreaError> {
        let object = value.as_object().ok_or(MarkedAreaError::NotAnObject)?;
        let mut geometry = [0.0f64; 4];
        for (slot, key) in geometry.iter_mut().zip(GEOMETRY_KEYS) {
            let raw = object.get(key).ok_or(MarkedAreaError::MissingKey(key))?;
            *slot = number_from_value(raw).ok_or(MarkedAreaError::NotANumber(key))?;
        }
        let [x, y, width, height] = geometry;
        let area = Self::new(x, y, width, height)?;
        Ok(match object.get("description").and_then(Value::as_str) {
            Some(description) => area.with_description(description),
            None => area,
        })
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

fn check_unit(key: &'static str, value: f64) -> Result<f64, MarkedAreaError> {
    if !value.is_finite() {
        return Err(MarkedAreaError::NotANumber(key));
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(MarkedAreaError::OutOfRange { key });
    }
    Ok(value)
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn normalize_description(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<&str>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(DESCRIPTION_MAX_CHARS).collect())
}
