use serde::{Deserialize, Serialize};

use crate::pipeline::MarkedAreaError;

/// Failure taxonomy shared by the retry policy, the fallback decision and
/// user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Network,
    Quota,
    Auth,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::Unknown => "unknown",
        }
    }

    /// Only transient transport conditions are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }

    /// Kinds that reach the caller as errors instead of a degraded result.
    pub fn propagates(self) -> bool {
        matches!(self, Self::Validation | Self::Quota | Self::Auth)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Validation => "The photo or the marked areas could not be used. Check the image and try again.",
            Self::Network => "The editing service could not be reached. Check your connection and try again.",
            Self::Quota => "The editing service is busy or its usage limit was reached. Please try again later.",
            Self::Auth => "The editing service rejected the app's credentials. Configuration needs to be fixed.",
            Self::Unknown => "Something went wrong while editing the photo.",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("image is empty")]
    EmptyImage,
    #[error("image is {size} bytes, above the {max} byte limit")]
    ImageTooLarge { size: usize, max: usize },
    #[error("image format is not supported")]
    UnsupportedFormat,
    #[error("{count} marked areas exceed the limit of {max}")]
    TooManyMarkedAreas { count: usize, max: usize },
    #[error("marked area {index} is invalid: {reason}")]
    MarkedAreaInvalid {
        index: usize,
        reason: MarkedAreaError,
    },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyImage => "empty_image",
            Self::ImageTooLarge { .. } => "image_too_large",
            Self::UnsupportedFormat => "unsupported_format",
            Self::TooManyMarkedAreas { .. } => "too_many_marked_areas",
            Self::MarkedAreaInvalid { .. } => "marked_area_invalid",
        }
    }
}
