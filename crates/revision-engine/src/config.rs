use std::env;
use std::time::Duration;

use revision_contracts::pipeline::ProcessingContext;
use serde_json::Value;

use crate::stage::Stage;

pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_MARKED_AREAS: usize = 20;

const MAX_ATTEMPTS_CEILING: f64 = 6.0;
const TIMEOUT_FLOOR_S: f64 = 1.0;
const TIMEOUT_CEILING_S: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { multiplier: f64, max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on calls per stage, first attempt included.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn exponential(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff = Backoff::Exponential {
            multiplier: multiplier.max(1.0),
            max_delay,
        };
        self
    }

    /// Sleep before the attempt that follows `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = failed_attempt.saturating_sub(1).min(16) as i32;
                let scaled = self.delay.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(scaled.min(max_delay.as_secs_f64()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimits {
    pub max_image_bytes: usize,
    pub max_marked_areas: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_marked_areas: DEFAULT_MAX_MARKED_AREAS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub analysis_model: String,
    pub generation_model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: Option<f64>,
    pub analysis_timeout: Duration,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    pub limits: InputLimits,
    pub fallback_enabled: bool,
    pub system_instruction: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            temperature: 0.4,
            max_output_tokens: 2048,
            top_p: None,
            analysis_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            limits: InputLimits::default(),
            fallback_enabled: true,
            system_instruction: None,
        }
    }
}

/// Effective knobs for one stage of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct StageParameters {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: Option<f64>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `REVISION_*` keys; unknown or unparsable values
    /// keep their defaults and numeric values are clamped.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(Value::String)
        };
        let defaults = Self::default();

        let mut retry = RetryPolicy::default();
        retry.max_attempts = value_as_f64(
            read("REVISION_MAX_ATTEMPTS").as_ref(),
            retry.max_attempts as f64,
            1.0,
            MAX_ATTEMPTS_CEILING,
        )
        .round() as u32;
        retry.delay = Duration::from_millis(value_as_f64(
            read("REVISION_RETRY_DELAY_MS").as_ref(),
            retry.delay.as_millis() as f64,
            0.0,
            30_000.0,
        ) as u64);
        if read("REVISION_RETRY_BACKOFF")
            .as_ref()
            .and_then(Value::as_str)
            .map(|raw| raw.eq_ignore_ascii_case("exponential"))
            .unwrap_or(false)
        {
            retry = retry.exponential(2.0, Duration::from_secs(30));
        }

        Self {
            analysis_model: read("REVISION_ANALYSIS_MODEL")
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or(defaults.analysis_model),
            generation_model: read("REVISION_GENERATION_MODEL")
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or(defaults.generation_model),
            temperature: value_as_f64(
                read("REVISION_TEMPERATURE").as_ref(),
                defaults.temperature,
                0.0,
                2.0,
            ),
            max_output_tokens: value_as_f64(
                read("REVISION_MAX_OUTPUT_TOKENS").as_ref(),
                defaults.max_output_tokens as f64,
                64.0,
                65_536.0,
            )
            .round() as u32,
            top_p: read("REVISION_TOP_P")
                .as_ref()
                .map(|value| value_as_f64(Some(value), 0.95, 0.0, 1.0)),
            analysis_timeout: Duration::from_secs_f64(value_as_f64(
                read("REVISION_ANALYSIS_TIMEOUT_S").as_ref(),
                defaults.analysis_timeout.as_secs_f64(),
                TIMEOUT_FLOOR_S,
                TIMEOUT_CEILING_S,
            )),
            generation_timeout: Duration::from_secs_f64(value_as_f64(
                read("REVISION_GENERATION_TIMEOUT_S").as_ref(),
                defaults.generation_timeout.as_secs_f64(),
                TIMEOUT_FLOOR_S,
                TIMEOUT_CEILING_S,
            )),
            retry,
            limits: InputLimits {
                max_image_bytes: value_as_f64(
                    read("REVISION_MAX_IMAGE_BYTES").as_ref(),
                    defaults.limits.max_image_bytes as f64,
                    1024.0,
                    64.0 * 1024.0 * 1024.0,
                ) as usize,
                max_marked_areas: value_as_f64(
                    read("REVISION_MAX_MARKED_AREAS").as_ref(),
                    defaults.limits.max_marked_areas as f64,
                    1.0,
                    200.0,
                ) as usize,
            },
            fallback_enabled: read("REVISION_FALLBACK")
                .as_ref()
                .and_then(value_as_bool)
                .unwrap_or(defaults.fallback_enabled),
            system_instruction: read("REVISION_SYSTEM_INSTRUCTION")
                .and_then(|value| value.as_str().map(str::to_string)),
        }
    }

    /// Merges request overrides over the configured defaults for `stage`.
    pub fn stage_parameters(&self, context: &ProcessingContext, stage: Stage) -> StageParameters {
        let (model, default_timeout) = match stage {
            Stage::Analysis => (
                context
                    .analysis_model
                    .clone()
                    .unwrap_or_else(|| self.analysis_model.clone()),
                self.analysis_timeout,
            ),
            Stage::Generation => (
                context
                    .generation_model
                    .clone()
                    .unwrap_or_else(|| self.generation_model.clone()),
                self.generation_timeout,
            ),
        };
        let mut retry = self.retry.clone();
        retry.max_attempts = value_as_f64(
            context.parameter("max_attempts"),
            retry.max_attempts as f64,
            1.0,
            MAX_ATTEMPTS_CEILING,
        )
        .round() as u32;

        StageParameters {
            model,
            temperature: value_as_f64(context.parameter("temperature"), self.temperature, 0.0, 2.0),
            max_output_tokens: value_as_f64(
                context.parameter("max_output_tokens"),
                self.max_output_tokens as f64,
                64.0,
                65_536.0,
            )
            .round() as u32,
            top_p: context
                .parameter("top_p")
                .map(|value| value_as_f64(Some(value), 0.95, 0.0, 1.0))
                .or(self.top_p),
            timeout: Duration::from_secs_f64(value_as_f64(
                context.parameter("request_timeout"),
                default_timeout.as_secs_f64(),
                TIMEOUT_FLOOR_S.min(default_timeout.as_secs_f64()),
                TIMEOUT_CEILING_S,
            )),
            retry,
        }
    }
}

fn value_as_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = value.and_then(|row| match row {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    });
    parsed
        .filter(|number| number.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(raw) => Some(*raw),
        Value::Number(raw) => raw.as_i64().map(|value| value != 0),
        Value::String(raw) => {
            let lowered = raw.trim().to_ascii_lowercase();
            if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
                Some(true)
            } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}
