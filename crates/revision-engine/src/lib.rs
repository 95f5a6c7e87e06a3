//! Request pipeline for Revision: input validation, prompt rendering, the
//! two model stages with retries, response parsing, and the degraded
//! fallback path.

pub mod client;
pub mod config;
pub mod errors;
pub mod executor;
pub mod fallback;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod stage;
pub mod validator;

pub use client::{
    default_client_registry, ClientRegistry, DryrunClient, GeminiClient, ModelClient,
    ModelRequest, ScriptedClient, ScriptedOutcome,
};
pub use config::{PipelineConfig, RetryPolicy};
pub use errors::{ClientError, PipelineError, StageError};
pub use executor::{PipelineExecutor, StageImage, StageOutput};
pub use pipeline::{RevisionPipeline, RevisionPipelineBuilder};
pub use stage::Stage;
