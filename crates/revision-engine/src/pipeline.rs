use revision_contracts::events::EventWriter;
use revision_contracts::failure::{FailureKind, ValidationError};
use revision_contracts::models::{ModelRegistry, ModelSelector};
use revision_contracts::pipeline::{
    new_request_id, MarkedArea, PipelineMetadata, PipelineResult, PipelineState,
    PipelineStateMachine, ProcessingContext,
};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::Instrument;

use crate::client::{default_client_registry, ClientRegistry};
use crate::config::PipelineConfig;
use crate::errors::{error_chain_text, ClientError, PipelineError, StageError};
use crate::executor::{PipelineExecutor, StageImage};
use crate::fallback::fallback;
use crate::prompt::build_analysis_prompt;
use crate::stage::Stage;
use crate::validator::{validate_request, validate_typed_request, ValidatedInput};

enum AreaInput<'a> {
    Raw(&'a [Value]),
    Typed(Vec<MarkedArea>),
}

impl AreaInput<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Raw(rows) => rows.len(),
            Self::Typed(areas) => areas.len(),
        }
    }
}

/// Mutable bookkeeping for one request.
struct RequestRun {
    request_id: String,
    started: Instant,
    machine: PipelineStateMachine,
    metadata: PipelineMetadata,
}

impl RequestRun {
    fn new() -> Self {
        let request_id = new_request_id();
        Self {
            metadata: PipelineMetadata {
                request_id: request_id.clone(),
                ..PipelineMetadata::default()
            },
            request_id,
            started: Instant::now(),
            machine: PipelineStateMachine::new(),
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        self.machine.advance(next)?;
        tracing::debug!(request_id = %self.request_id, state = %next, "pipeline state changed");
        Ok(())
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish_metadata(&mut self) -> PipelineMetadata {
        let mut metadata = std::mem::take(&mut self.metadata);
        metadata.state_trail = self.machine.trail().to_vec();
        metadata
    }
}

/// Entry point for callers: validate, analyze, generate, and degrade to a
/// fallback result when the model stages fail for recoverable reasons.
#[derive(Debug, Clone)]
pub struct RevisionPipeline {
    executor: PipelineExecutor,
}

#[derive(Debug, Default)]
pub struct RevisionPipelineBuilder {
    config: Option<PipelineConfig>,
    clients: Option<ClientRegistry>,
    models: Option<ModelRegistry>,
    events: Option<EventWriter>,
}

impl RevisionPipelineBuilder {
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn clients(mut self, clients: ClientRegistry) -> Self {
        self.clients = Some(clients);
        self
    }

    #[must_use]
    pub fn models(mut self, models: ModelRegistry) -> Self {
        self.models = Some(models);
        self
    }

    #[must_use]
    pub fn events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> RevisionPipeline {
        RevisionPipeline {
            executor: PipelineExecutor::new(
                self.config.unwrap_or_default(),
                self.clients.unwrap_or_else(default_client_registry),
                ModelSelector::new(self.models),
                self.events,
            ),
        }
    }
}

impl RevisionPipeline {
    pub fn builder() -> RevisionPipelineBuilder {
        RevisionPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        self.executor.config()
    }

    /// Processes marked areas exactly as the UI sends them.
    pub async fn process(
        &self,
        image: Vec<u8>,
        marked_areas: &[Value],
        context: &ProcessingContext,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(image, AreaInput::Raw(marked_areas), context).await
    }

    pub async fn process_areas(
        &self,
        image: Vec<u8>,
        marked_areas: Vec<MarkedArea>,
        context: &ProcessingContext,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(image, AreaInput::Typed(marked_areas), context).await
    }

    async fn run(
        &self,
        image: Vec<u8>,
        areas: AreaInput<'_>,
        context: &ProcessingContext,
    ) -> Result<PipelineResult, PipelineError> {
        let mut run = RequestRun::new();
        let span = tracing::info_span!("revision_request", request_id = %run.request_id);
        async move {
            self.emit(
                "request_started",
                &run.request_id,
                json!({
                    "image_bytes": image.len(),
                    "marked_area_count": areas.len(),
                    "has_instructions": context.user_instructions().is_some(),
                }),
            );

            run.advance(PipelineState::Validating)?;
            let limits = &self.config().limits;
            let validated = match areas {
                AreaInput::Raw(rows) => validate_request(&image, rows, limits),
                AreaInput::Typed(typed) => validate_typed_request(&image, typed, limits),
            };
            let validated = match validated {
                Ok(validated) => validated,
                Err(err) => return self.reject(&mut run, err),
            };
            run.metadata.marked_area_count = validated.marked_areas.len();

            match self.execute(&mut run, &image, &validated, context).await {
                Ok(result) => Ok(result),
                Err(err) => self.recover(&mut run, image, err),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        run: &mut RequestRun,
        image: &[u8],
        validated: &ValidatedInput,
        context: &ProcessingContext,
    ) -> Result<PipelineResult, StageError> {
        let stage_image = StageImage::new(image.to_vec(), validated.mime_type());

        self.advance_in_stage(run, PipelineState::Analyzing, Stage::Analysis)?;
        let prompt = build_analysis_prompt(&validated.marked_areas, context.user_instructions());
        let analysis = self
            .executor
            .analyze(&stage_image, &prompt, context, &run.request_id)
            .await
            .inspect_err(|err| run.metadata.analysis_attempts = err.attempts)?;
        run.metadata.analysis_attempts = analysis.attempts;
        run.metadata.analysis_model = Some(analysis.model);
        run.metadata.warnings.extend(analysis.warnings);

        self.advance_in_stage(run, PipelineState::Generating, Stage::Generation)?;
        let generation = self
            .executor
            .generate(&stage_image, &analysis.value, context, &run.request_id)
            .await
            .inspect_err(|err| run.metadata.generation_attempts = err.attempts)?;
        run.metadata.generation_attempts = generation.attempts;
        run.metadata.generation_model = Some(generation.model);
        run.metadata.warnings.extend(generation.warnings);

        self.advance_in_stage(run, PipelineState::Succeeded, Stage::Generation)?;
        let processing_time_ms = run.elapsed_ms();
        let metadata = run.finish_metadata();
        self.emit_finished(&run.request_id, "succeeded", None, processing_time_ms);
        tracing::info!(
            request_id = %run.request_id,
            processing_time_ms,
            analysis_attempts = metadata.analysis_attempts,
            generation_attempts = metadata.generation_attempts,
            "request succeeded"
        );
        Ok(PipelineResult::new(
            image.to_vec(),
            analysis.value,
            generation.value,
            processing_time_ms,
            metadata,
        ))
    }

    /// A state-machine violation inside a stage is reported as that stage
    /// failing, so it still takes the fallback route.
    fn advance_in_stage(
        &self,
        run: &mut RequestRun,
        next: PipelineState,
        stage: Stage,
    ) -> Result<(), StageError> {
        run.machine.advance(next).map_err(|err| StageError {
            stage,
            kind: FailureKind::Unknown,
            attempts: 0,
            source: ClientError::Unavailable(err.to_string()),
        })
    }

    fn reject(&self, run: &mut RequestRun, err: ValidationError) -> Result<PipelineResult, PipelineError> {
        run.advance(PipelineState::Failed(FailureKind::Validation))?;
        tracing::info!(request_id = %run.request_id, code = err.code(), error = %err, "request rejected");
        self.emit(
            "validation_failed",
            &run.request_id,
            json!({ "code": err.code(), "message": err.to_string() }),
        );
        self.emit_finished(&run.request_id, "failed", Some(FailureKind::Validation), run.elapsed_ms());
        Err(PipelineError::Validation(err))
    }

    fn recover(
        &self,
        run: &mut RequestRun,
        image: Vec<u8>,
        err: StageError,
    ) -> Result<PipelineResult, PipelineError> {
        run.advance(PipelineState::Failed(err.kind))?;
        let reason = error_chain_text(&err, 800);
        if err.kind == FailureKind::Unknown {
            tracing::error!(
                request_id = %run.request_id,
                stage = err.stage.as_str(),
                attempts = err.attempts,
                error = %reason,
                "stage failed with unclassified error"
            );
        } else {
            tracing::warn!(
                request_id = %run.request_id,
                stage = err.stage.as_str(),
                attempts = err.attempts,
                error_kind = err.kind.as_str(),
                error = %reason,
                "stage failed"
            );
        }
        self.emit(
            "stage_failed",
            &run.request_id,
            json!({
                "stage": err.stage.as_str(),
                "error_kind": err.kind.as_str(),
                "attempts": err.attempts,
                "error": reason,
            }),
        );

        if err.kind.propagates() || !self.config().fallback_enabled {
            self.emit_finished(&run.request_id, "failed", Some(err.kind), run.elapsed_ms());
            return Err(PipelineError::from_stage(err));
        }

        run.advance(PipelineState::Fallback)?;
        run.advance(PipelineState::SucceededDegraded)?;
        let processing_time_ms = run.elapsed_ms();
        let marked_area_count = run.metadata.marked_area_count;
        let metadata = run.finish_metadata();
        let result = fallback(
            image,
            marked_area_count,
            &reason,
            err.kind,
            processing_time_ms,
            metadata,
        );
        self.emit(
            "fallback_used",
            &run.request_id,
            json!({
                "stage": err.stage.as_str(),
                "error_kind": err.kind.as_str(),
                "editing_prompt": result.analysis_prompt(),
            }),
        );
        self.emit_finished(&run.request_id, "succeeded_degraded", Some(err.kind), processing_time_ms);
        Ok(result)
    }

    fn emit_finished(
        &self,
        request_id: &str,
        status: &str,
        failure_kind: Option<FailureKind>,
        processing_time_ms: u64,
    ) {
        self.emit(
            "request_finished",
            request_id,
            json!({
                "status": status,
                "failure_kind": failure_kind.map(FailureKind::as_str),
                "processing_time_ms": processing_time_ms,
            }),
        );
    }

    fn emit(&self, event_type: &str, request_id: &str, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.executor.emit(event_type, request_id, payload);
    }
}
