mod analysis;
mod context;
mod marked_area;
mod result;
mod state;

pub use analysis::{AnalysisResult, AnalysisSource};
pub use context::ProcessingContext;
pub use marked_area::{MarkedArea, MarkedAreaError, GEOMETRY_KEYS};
pub use result::{PipelineMetadata, PipelineResult};
pub use state::{InvalidTransition, PipelineState, PipelineStateMachine};

pub fn new_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4().simple())
}
