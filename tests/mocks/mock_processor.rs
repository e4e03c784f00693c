//! Scripted content processor
//!
//! Each payload ref gets a queue of steps; once the script for a ref runs out
//! the processor succeeds with `text of <ref>`. Every call is recorded.

#![allow(dead_code)]

use async_trait::async_trait;
use cogito_ingest::ingest::JobPayload;
use cogito_ingest::processing::{ContentProcessor, ProcessingError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Succeed(String),
    Transient(&'static str),
    Permanent(&'static str),
    Panic,
    /// Takes this long, then succeeds
    Slow(Duration),
}

/// One recorded processor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub payload_ref: String,
    pub priority: u8,
    pub retry_count: u32,
}

#[derive(Default)]
pub struct MockProcessor {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends steps for one payload ref.
    pub fn script(&self, payload_ref: &str, steps: impl IntoIterator<Item = Step>) {
        self.script
            .lock()
            .entry(payload_ref.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Payload refs in processing order.
    pub fn processed_refs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.payload_ref.clone()).collect()
    }

    pub fn calls_for(&self, payload_ref: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.payload_ref == payload_ref)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContentProcessor for MockProcessor {
    async fn process(&self, payload: &JobPayload) -> Result<String, ProcessingError> {
        self.calls.lock().push(Call {
            payload_ref: payload.payload_ref.clone(),
            priority: payload.priority,
            retry_count: payload.retry_count,
        });

        let step = self
            .script
            .lock()
            .get_mut(&payload.payload_ref)
            .and_then(|steps| steps.pop_front());

        match step {
            None => Ok(format!("text of {}", payload.payload_ref)),
            Some(Step::Succeed(text)) => Ok(text),
            Some(Step::Transient(msg)) => Err(ProcessingError::transient(msg)),
            Some(Step::Permanent(msg)) => Err(ProcessingError::permanent(msg)),
            Some(Step::Panic) => panic!("processor crashed on {}", payload.payload_ref),
            Some(Step::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(format!("text of {}", payload.payload_ref))
            }
        }
    }
}
