//! Test doubles shared by the pipeline unit tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::foundation::{DomainEvent, EventEnvelope};
use crate::domain::pipeline::InvocationError;
use crate::ports::SideEffectInvoker;

/// Matches the payload of `EventEnvelope::test_fixture`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEvent {
    pub entity_id: String,
}

impl DomainEvent for FixtureEvent {
    fn event_type(&self) -> &'static str {
        "test.event.v1"
    }

    fn entity_id(&self) -> String {
        self.entity_id.clone()
    }
}

/// Invoker that replays scripted results, then succeeds.
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<(), InvocationError>>>,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with_script(results: Vec<Result<(), InvocationError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call with the same error.
    pub fn always(error: InvocationError) -> Self {
        Self::with_script(vec![Err(error); 64])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SideEffectInvoker for ScriptedInvoker {
    async fn invoke(&self, _envelope: &EventEnvelope) -> Result<(), InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
