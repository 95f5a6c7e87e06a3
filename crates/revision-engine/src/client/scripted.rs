use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{ModelClient, ModelRequest};
use crate::errors::ClientError;

/// One canned reply. `Delayed` waits before resolving the inner outcome,
/// which lets tests drive stage timeouts.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Text(String),
    Image(Vec<u8>),
    Fail(ClientError),
    Delayed(Duration, Box<ScriptedOutcome>),
}

impl ScriptedOutcome {
    pub fn delayed(delay: Duration, outcome: ScriptedOutcome) -> Self {
        Self::Delayed(delay, Box::new(outcome))
    }
}

#[derive(Debug, Default)]
struct Script {
    analyze: VecDeque<ScriptedOutcome>,
    generate: VecDeque<ScriptedOutcome>,
    requests: Vec<ModelRequest>,
}

/// Replays queued outcomes per stage. The last queued outcome of a stage
/// repeats once the queue is down to it.
#[derive(Debug)]
pub struct ScriptedClient {
    name: String,
    script: Mutex<Script>,
    analyze_calls: AtomicU32,
    generate_calls: AtomicU32,
}

impl ScriptedClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Script::default()),
            analyze_calls: AtomicU32::new(0),
            generate_calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_analysis(self, outcome: ScriptedOutcome) -> Self {
        self.lock().analyze.push_back(outcome);
        self
    }

    #[must_use]
    pub fn with_generation(self, outcome: ScriptedOutcome) -> Self {
        self.lock().generate.push_back(outcome);
        self
    }

    pub fn analyze_calls(&self) -> u32 {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.analyze_calls() + self.generate_calls()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_outcome(&self, request: &ModelRequest, analysis: bool) -> Option<ScriptedOutcome> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        let queue = if analysis {
            &mut script.analyze
        } else {
            &mut script.generate
        };
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

async fn resolve(mut outcome: ScriptedOutcome) -> ScriptedOutcome {
    loop {
        match outcome {
            ScriptedOutcome::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                outcome = *inner;
            }
            other => return other,
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, request: &ModelRequest) -> Result<String, ClientError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        let Some(outcome) = self.next_outcome(request, true) else {
            return Err(ClientError::InvalidResponse(
                "no scripted analysis outcome".to_string(),
            ));
        };
        match resolve(outcome).await {
            ScriptedOutcome::Text(text) => Ok(text),
            ScriptedOutcome::Fail(err) => Err(err),
            _ => Err(ClientError::InvalidResponse(
                "scripted analysis outcome is not text".to_string(),
            )),
        }
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Vec<u8>, ClientError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let Some(outcome) = self.next_outcome(request, false) else {
            return Err(ClientError::InvalidResponse(
                "no scripted generation outcome".to_string(),
            ));
        };
        match resolve(outcome).await {
            ScriptedOutcome::Image(bytes) => Ok(bytes),
            ScriptedOutcome::Fail(err) => Err(err),
            _ => Err(ClientError::InvalidResponse(
                "scripted generation outcome is not an image".to_string(),
            )),
        }
    }
}
