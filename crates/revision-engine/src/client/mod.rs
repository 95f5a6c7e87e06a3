mod dryrun;
mod gemini;
mod scripted;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ClientError;

pub use dryrun::DryrunClient;
pub use gemini::GeminiClient;
pub use scripted::{ScriptedClient, ScriptedOutcome};

/// One call to a model: the photo plus a text prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub image: Arc<[u8]>,
    pub mime_type: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: Option<f64>,
}

/// A provider able to serve both pipeline stages.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    /// Stage A: returns the raw text answer.
    async fn analyze(&self, request: &ModelRequest) -> Result<String, ClientError>;

    /// Stage B: returns encoded image bytes.
    async fn generate(&self, request: &ModelRequest) -> Result<Vec<u8>, ClientError>;
}

/// Clients keyed by provider name.
#[derive(Default, Clone)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn ModelClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: ModelClient + 'static>(&mut self, client: C) {
        self.register_shared(Arc::new(client));
    }

    /// Registers a client the caller keeps a handle to, e.g. to inspect
    /// call counters afterwards.
    pub fn register_shared(&mut self, client: Arc<dyn ModelClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.names())
            .finish()
    }
}

pub fn default_client_registry() -> ClientRegistry {
    let mut clients = ClientRegistry::new();
    clients.register(DryrunClient);
    clients.register(GeminiClient::from_env());
    clients
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{default_client_registry, ClientRegistry, ModelClient, ScriptedClient};

    #[test]
    fn default_registry_serves_known_providers() {
        let registry = default_client_registry();
        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn shared_registration_keeps_caller_handle() {
        let scripted = Arc::new(ScriptedClient::new("gemini"));
        let mut registry = ClientRegistry::new();
        registry.register_shared(scripted.clone());
        let resolved = registry.get("gemini").unwrap();
        assert_eq!(resolved.name(), "gemini");
        assert_eq!(Arc::strong_count(&scripted), 3);
    }
}
