use std::error::Error as StdError;
use std::time::Duration;

use revision_contracts::failure::{FailureKind, ValidationError};
use revision_contracts::pipeline::InvalidTransition;

use crate::stage::Stage;

/// Failure reported by a [`crate::client::ModelClient`] for a single call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{provider} request failed ({status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0} returned an empty response")]
    EmptyResponse(String),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("no client available: {0}")]
    Unavailable(String),
}

/// A stage that could not produce output within its retry budget.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} stage failed after {attempts} attempt(s)")]
pub struct StageError {
    pub stage: Stage,
    pub kind: FailureKind,
    pub attempts: u32,
    #[source]
    pub source: ClientError,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("input rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("provider quota exhausted")]
    Quota(#[source] StageError),
    #[error("provider rejected credentials")]
    Auth(#[source] StageError),
    #[error("pipeline failed without fallback")]
    Stage(#[source] StageError),
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Quota(_) => FailureKind::Quota,
            Self::Auth(_) => FailureKind::Auth,
            Self::Stage(err) => err.kind,
            Self::State(_) => FailureKind::Unknown,
        }
    }

    /// Text safe to show an end user; never contains provider output.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    pub(crate) fn from_stage(err: StageError) -> Self {
        match err.kind {
            FailureKind::Quota => Self::Quota(err),
            FailureKind::Auth => Self::Auth(err),
            _ => Self::Stage(err),
        }
    }
}

pub fn classify(err: &ClientError) -> FailureKind {
    match err {
        ClientError::Timeout(_) | ClientError::Transport(_) => FailureKind::Network,
        ClientError::MissingCredentials(_) => FailureKind::Auth,
        ClientError::Status { status, body, .. } => match status {
            401 | 403 => FailureKind::Auth,
            429 => FailureKind::Quota,
            408 | 500..=599 => FailureKind::Network,
            _ => classify_message(body),
        },
        ClientError::InvalidResponse(message)
        | ClientError::EmptyResponse(message)
        | ClientError::Blocked(message) => classify_message(message),
        ClientError::Unavailable(_) => FailureKind::Unknown,
    }
}

/// Keyword classification for provider messages that arrive without a
/// usable status code. Quota wins over auth when both appear.
pub fn classify_message(message: &str) -> FailureKind {
    let upper = message.to_ascii_uppercase();
    let tokens: Vec<&str> = upper
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|token| !token.is_empty())
        .collect();
    let has_token = |needle: &str| tokens.iter().any(|token| *token == needle);
    let has_phrase = |needle: &str| upper.contains(needle);

    if has_token("429")
        || has_token("QUOTA")
        || has_token("RESOURCE_EXHAUSTED")
        || has_token("BILLING")
        || has_phrase("RATE LIMIT")
        || has_phrase("TOO MANY REQUESTS")
    {
        return FailureKind::Quota;
    }
    if has_token("401")
        || has_token("403")
        || has_token("PERMISSION_DENIED")
        || has_token("UNAUTHENTICATED")
        || has_token("UNAUTHORIZED")
        || has_phrase("API KEY")
        || has_phrase("API_KEY_INVALID")
        || has_phrase("CREDENTIAL")
    {
        return FailureKind::Auth;
    }
    if ["408", "500", "502", "503", "504", "UNAVAILABLE", "DEADLINE_EXCEEDED", "TIMEOUT"]
        .iter()
        .any(|needle| has_token(needle))
        || has_phrase("TIMED OUT")
        || has_phrase("CONNECTION RESET")
        || has_phrase("CONNECTION REFUSED")
    {
        return FailureKind::Network;
    }
    FailureKind::Unknown
}

pub fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && parts
                .last()
                .map(|existing| existing != trimmed)
                .unwrap_or(true)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use revision_contracts::failure::FailureKind;

    use super::{classify, classify_message, error_chain_text, ClientError, PipelineError, StageError};
    use crate::stage::Stage;

    fn status(code: u16, body: &str) -> ClientError {
        ClientError::Status {
            provider: "Gemini".to_string(),
            status: code,
            body: body.to_string(),
        }
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(classify(&status(401, "")), FailureKind::Auth);
        assert_eq!(classify(&status(403, "")), FailureKind::Auth);
        assert_eq!(classify(&status(429, "")), FailureKind::Quota);
        assert_eq!(classify(&status(503, "")), FailureKind::Network);
        assert_eq!(classify(&status(408, "")), FailureKind::Network);
        assert_eq!(classify(&status(404, "model not found")), FailureKind::Unknown);
        assert_eq!(
            classify(&status(400, "API key not valid. Please pass a valid API key.")),
            FailureKind::Auth
        );
    }

    #[test]
    fn transport_failures_are_network() {
        assert_eq!(
            classify(&ClientError::Timeout(Duration::from_secs(30))),
            FailureKind::Network
        );
        assert_eq!(
            classify(&ClientError::Transport("connection refused".to_string())),
            FailureKind::Network
        );
        assert_eq!(
            classify(&ClientError::MissingCredentials("GEMINI_API_KEY".to_string())),
            FailureKind::Auth
        );
    }

    #[test]
    fn message_classification_uses_whole_tokens() {
        assert_eq!(
            classify_message("RESOURCE_EXHAUSTED: Quota exceeded for metric"),
            FailureKind::Quota
        );
        assert_eq!(classify_message("status: PERMISSION_DENIED"), FailureKind::Auth);
        assert_eq!(classify_message("upstream 503 UNAVAILABLE"), FailureKind::Network);
        assert_eq!(
            classify_message("image is 5000 pixels wide"),
            FailureKind::Unknown
        );
    }

    #[test]
    fn pipeline_error_routes_stage_kinds() {
        let quota = StageError {
            stage: Stage::Analysis,
            kind: FailureKind::Quota,
            attempts: 1,
            source: status(429, "quota"),
        };
        let err = PipelineError::from_stage(quota);
        assert!(matches!(err, PipelineError::Quota(_)));
        assert_eq!(err.kind(), FailureKind::Quota);
        assert!(!err.user_message().contains("429"));
    }

    #[test]
    fn error_chain_text_walks_sources() {
        let err = PipelineError::Stage(StageError {
            stage: Stage::Generation,
            kind: FailureKind::Network,
            attempts: 3,
            source: ClientError::Timeout(Duration::from_millis(1500)),
        });
        let rendered = error_chain_text(&err, 400);
        assert_eq!(
            rendered,
            "pipeline failed without fallback | caused by: generation stage failed after 3 attempt(s) | caused by: request timed out after 1500ms"
        );
        assert!(error_chain_text(&err, 10).ends_with('…'));
    }
}
