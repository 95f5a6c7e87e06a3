use std::sync::Arc;

use revision_contracts::events::EventWriter;
use revision_contracts::failure::FailureKind;
use revision_contracts::models::{ModelSelector, ANALYSIS_CAPABILITY, GENERATION_CAPABILITY};
use revision_contracts::pipeline::{AnalysisResult, AnalysisSource, ProcessingContext};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::client::{ClientRegistry, ModelClient, ModelRequest};
use crate::config::{PipelineConfig, StageParameters};
use crate::errors::{ClientError, StageError};
use crate::parser::parse_analysis_response;
use crate::prompt::{build_generation_prompt, ANALYSIS_SYSTEM_INSTRUCTION};
use crate::retry::{execute_with_retry, AttemptReport};
use crate::stage::Stage;

/// Value produced by one stage plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub model: String,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

/// The photo as sent to both stages.
#[derive(Debug, Clone)]
pub struct StageImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl StageImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }
}

struct ResolvedStage {
    parameters: StageParameters,
    client: Arc<dyn ModelClient>,
    warnings: Vec<String>,
}

/// Runs the analysis and generation stages against the registered clients.
/// Holds no per-request state.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    config: PipelineConfig,
    clients: ClientRegistry,
    selector: ModelSelector,
    events: Option<EventWriter>,
}

impl PipelineExecutor {
    pub fn new(
        config: PipelineConfig,
        clients: ClientRegistry,
        selector: ModelSelector,
        events: Option<EventWriter>,
    ) -> Self {
        Self {
            config,
            clients,
            selector,
            events,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage A: image plus prompt in, parsed editing instruction out.
    pub async fn analyze(
        &self,
        image: &StageImage,
        prompt: &str,
        context: &ProcessingContext,
        request_id: &str,
    ) -> Result<StageOutput<AnalysisResult>, StageError> {
        let stage = Stage::Analysis;
        let resolved = self.resolve(stage, context)?;
        let system_instruction = context
            .system_instruction()
            .or(self.config.system_instruction.as_deref())
            .unwrap_or(ANALYSIS_SYSTEM_INSTRUCTION)
            .to_string();
        let request = model_request(&resolved.parameters, image, prompt, Some(system_instruction));

        let started = Instant::now();
        let client: &dyn ModelClient = resolved.client.as_ref();
        let request_ref = &request;
        let (raw, attempts) = execute_with_retry(
            &resolved.parameters.retry,
            resolved.parameters.timeout,
            stage,
            move || async move { client.analyze(request_ref).await },
            |report| self.emit_attempt(request_id, &resolved.parameters.model, report),
        )
        .await?;

        let analysis = parse_analysis_response(&raw)
            .with_processing_time_ms(started.elapsed().as_millis() as u64);
        let mut warnings = resolved.warnings;
        if analysis.source == AnalysisSource::Heuristic {
            warnings.push("Analysis response was not structured JSON; used keyword extraction.".to_string());
        }
        tracing::info!(
            request_id,
            model = %resolved.parameters.model,
            attempts,
            confidence = analysis.confidence(),
            objects = analysis.identified_objects.len(),
            "analysis stage complete"
        );
        Ok(StageOutput {
            value: analysis,
            model: resolved.parameters.model,
            attempts,
            warnings,
        })
    }

    /// Stage B: edited image bytes for the analysis instruction.
    pub async fn generate(
        &self,
        image: &StageImage,
        analysis: &AnalysisResult,
        context: &ProcessingContext,
        request_id: &str,
    ) -> Result<StageOutput<Vec<u8>>, StageError> {
        let stage = Stage::Generation;
        let resolved = self.resolve(stage, context)?;
        let prompt = build_generation_prompt(analysis);
        let request = model_request(&resolved.parameters, image, &prompt, None);

        let client: &dyn ModelClient = resolved.client.as_ref();
        let request_ref = &request;
        let (bytes, attempts) = execute_with_retry(
            &resolved.parameters.retry,
            resolved.parameters.timeout,
            stage,
            move || async move {
                let bytes = client.generate(request_ref).await?;
                if bytes.is_empty() {
                    return Err(ClientError::EmptyResponse(client.name().to_string()));
                }
                Ok(bytes)
            },
            |report| self.emit_attempt(request_id, &resolved.parameters.model, report),
        )
        .await?;

        tracing::info!(
            request_id,
            model = %resolved.parameters.model,
            attempts,
            bytes = bytes.len(),
            "generation stage complete"
        );
        Ok(StageOutput {
            value: bytes,
            model: resolved.parameters.model,
            attempts,
            warnings: resolved.warnings,
        })
    }

    fn resolve(&self, stage: Stage, context: &ProcessingContext) -> Result<ResolvedStage, StageError> {
        let mut parameters = self.config.stage_parameters(context, stage);
        let capability = match stage {
            Stage::Analysis => ANALYSIS_CAPABILITY,
            Stage::Generation => GENERATION_CAPABILITY,
        };
        let unavailable = |message: String| StageError {
            stage,
            kind: FailureKind::Unknown,
            attempts: 0,
            source: ClientError::Unavailable(message),
        };

        let selection = self
            .selector
            .select(Some(parameters.model.as_str()), capability)
            .map_err(|message| unavailable(message))?;
        let client = self.clients.get(&selection.model.provider).ok_or_else(|| {
            unavailable(format!(
                "provider '{}' for model '{}' is not registered",
                selection.model.provider, selection.model.name
            ))
        })?;

        let mut warnings = Vec::new();
        if let Some(reason) = selection.fallback_reason {
            tracing::warn!(stage = stage.as_str(), reason = %reason, "model selection fell back");
            warnings.push(reason);
        }
        if let Some(limit) = selection.model.max_output_tokens {
            let limit = u32::try_from(limit).unwrap_or(u32::MAX);
            parameters.max_output_tokens = parameters.max_output_tokens.min(limit);
        }
        parameters.model = selection.model.name;
        Ok(ResolvedStage {
            parameters,
            client,
            warnings,
        })
    }

    fn emit_attempt(&self, request_id: &str, model: &str, report: &AttemptReport) {
        let mut payload = Map::new();
        payload.insert("stage".to_string(), json!(report.stage.as_str()));
        payload.insert("operation".to_string(), json!(report.stage.operation()));
        payload.insert("model".to_string(), json!(model));
        payload.insert("attempt".to_string(), json!(report.attempt));
        payload.insert("duration_ms".to_string(), json!(report.duration_ms));
        payload.insert(
            "error_kind".to_string(),
            report
                .error_kind
                .map(|kind| json!(kind.as_str()))
                .unwrap_or(Value::Null),
        );
        if let Some(error) = report.error.as_ref() {
            payload.insert("error".to_string(), json!(error));
        }
        payload.insert("will_retry".to_string(), json!(report.will_retry));
        self.emit("stage_attempt", request_id, payload);
    }

    /// Event logging never fails a request; write errors only reach the log.
    pub(crate) fn emit(&self, event_type: &str, request_id: &str, payload: Map<String, Value>) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, request_id, payload) {
            tracing::warn!(
                event_type,
                path = %events.path().display(),
                error = %err,
                "failed to write pipeline event"
            );
        }
    }
}

fn model_request(
    parameters: &StageParameters,
    image: &StageImage,
    prompt: &str,
    system_instruction: Option<String>,
) -> ModelRequest {
    ModelRequest {
        model: parameters.model.clone(),
        image: Arc::clone(&image.bytes),
        mime_type: image.mime_type.clone(),
        prompt: prompt.to_string(),
        system_instruction,
        temperature: parameters.temperature,
        max_output_tokens: parameters.max_output_tokens,
        top_p: parameters.top_p,
    }
}
