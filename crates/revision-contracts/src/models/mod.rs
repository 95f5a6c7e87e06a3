mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, ANALYSIS_CAPABILITY, GENERATION_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector};
