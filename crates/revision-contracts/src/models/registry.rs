use indexmap::IndexMap;

pub const ANALYSIS_CAPABILITY: &str = "analysis";
pub const GENERATION_CAPABILITY: &str = "generation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub max_output_tokens: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models in preference order; the first capable entry is the default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim().trim_start_matches("models/"))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Spec for a model name that is not listed, inferred from the name's
    /// provider prefix. The caller vouches for the capability.
    pub fn unlisted(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let name = name.trim().trim_start_matches("models/");
        if name.is_empty() || self.get(name).is_some() {
            return None;
        }
        let provider = provider_for_name(name)?;
        Some(ModelSpec {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: vec![capability.to_string()],
            max_output_tokens: None,
        })
    }
}

fn provider_for_name(name: &str) -> Option<&'static str> {
    let lowered = name.to_ascii_lowercase();
    ["gemini", "dryrun"]
        .into_iter()
        .find(|provider| lowered.starts_with(&format!("{provider}-")))
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[&str],
                      max_output_tokens: Option<u64>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                max_output_tokens,
            },
        );
    };

    insert(
        "gemini-2.5-flash",
        "gemini",
        &[ANALYSIS_CAPABILITY],
        Some(65536),
    );
    insert(
        "gemini-2.5-pro",
        "gemini",
        &[ANALYSIS_CAPABILITY],
        Some(65536),
    );
    insert(
        "gemini-2.0-flash",
        "gemini",
        &[ANALYSIS_CAPABILITY],
        Some(8192),
    );
    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &[GENERATION_CAPABILITY],
        Some(32768),
    );
    insert(
        "gemini-2.0-flash-preview-image-generation",
        "gemini",
        &[GENERATION_CAPABILITY],
        Some(8192),
    );
    insert("dryrun-analysis-1", "dryrun", &[ANALYSIS_CAPABILITY], None);
    insert("dryrun-image-1", "dryrun", &[GENERATION_CAPABILITY], None);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, ANALYSIS_CAPABILITY, GENERATION_CAPABILITY};

    #[test]
    fn defaults_prefer_gemini_for_both_stages() {
        let registry = ModelRegistry::default();
        let analysis = registry.by_capability(ANALYSIS_CAPABILITY);
        let generation = registry.by_capability(GENERATION_CAPABILITY);
        assert_eq!(analysis[0].name, "gemini-2.5-flash");
        assert_eq!(generation[0].name, "gemini-2.5-flash-image-preview");
        assert!(analysis.iter().all(|model| !model.supports(GENERATION_CAPABILITY)));
    }

    #[test]
    fn get_accepts_models_prefix() {
        let registry = ModelRegistry::default();
        let model = registry.get("models/gemini-2.0-flash");
        assert_eq!(model.map(|spec| spec.provider.as_str()), Some("gemini"));
        assert!(registry
            .ensure("gemini-2.0-flash", GENERATION_CAPABILITY)
            .is_none());
    }

    #[test]
    fn unlisted_names_resolve_by_provider_prefix() {
        let registry = ModelRegistry::default();
        let lite = registry
            .unlisted("models/gemini-2.5-flash-lite", ANALYSIS_CAPABILITY)
            .unwrap();
        assert_eq!(lite.name, "gemini-2.5-flash-lite");
        assert_eq!(lite.provider, "gemini");
        assert!(lite.supports(ANALYSIS_CAPABILITY));

        assert!(registry.unlisted("gpt-image-1", GENERATION_CAPABILITY).is_none());
        assert!(registry.unlisted("gemini", ANALYSIS_CAPABILITY).is_none());
        assert!(registry
            .unlisted("gemini-2.0-flash", GENERATION_CAPABILITY)
            .is_none());
    }
}
