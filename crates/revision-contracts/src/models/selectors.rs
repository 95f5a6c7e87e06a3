use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolves `requested` for `capability`.
    ///
    /// - listed and capable: used as is
    /// - unlisted with a known provider prefix: passed through by name
    /// - listed without the capability, or of unknown provenance: the first
    ///   capable model, with a fallback reason
    ///
    /// `None` selects the first capable model silently.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = if let Some(requested_value) = requested {
            let resolved = self
                .registry
                .ensure(requested_value, capability)
                .or_else(|| self.registry.unlisted(requested_value, capability));
            if let Some(model) = resolved {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            Some(format!(
                "Requested model '{requested_value}' unavailable for capability '{capability}'."
            ))
        } else {
            None
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{ModelRegistry, ModelSpec, ANALYSIS_CAPABILITY, GENERATION_CAPABILITY};

    fn model(name: &str, capability: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: vec![capability.to_string()],
            max_output_tokens: None,
        }
    }

    #[test]
    fn selector_falls_back_when_requested_model_unavailable() {
        let mut models = IndexMap::new();
        models.insert(
            "vision-default".to_string(),
            model("vision-default", ANALYSIS_CAPABILITY),
        );
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), ANALYSIS_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.name, "vision-default");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'analysis'.")
        );
    }

    #[test]
    fn selector_passes_unlisted_provider_models_through() {
        let selection = ModelSelector::default()
            .select(Some("gemini-3-pro-image-preview"), GENERATION_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-3-pro-image-preview");
        assert_eq!(selection.model.provider, "gemini");
        assert!(selection.fallback_reason.is_none());

        let mismatched = ModelSelector::default()
            .select(Some("gemini-2.5-pro"), GENERATION_CAPABILITY)
            .unwrap();
        assert_eq!(mismatched.model.name, "gemini-2.5-flash-image-preview");
        assert!(mismatched.fallback_reason.is_some());
    }

    #[test]
    fn selector_without_request_uses_default_silently() {
        let selection = ModelSelector::default()
            .select(None, GENERATION_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image-preview");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn selector_errors_when_no_model_has_capability() {
        let mut models = IndexMap::new();
        models.insert(
            "text-only".to_string(),
            model("text-only", ANALYSIS_CAPABILITY),
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("anything"), GENERATION_CAPABILITY)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'generation'.");
    }
}
