//! Call-counting generator used by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::DescriptionGenerator;
use crate::error::{DataDictError, Result};

/// Answers every prompt with `"generated #<n>"` and records the prompts.
#[derive(Default)]
pub(crate) struct CountingGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
    fail_when_contains: Option<String>,
}

impl CountingGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleeps before answering, to widen race windows
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails any prompt containing `needle`
    pub(crate) fn failing_on(mut self, needle: &str) -> Self {
        self.fail_when_contains = Some(needle.to_string());
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DescriptionGenerator for CountingGenerator {
    async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(needle) = &self.fail_when_contains {
            if prompt.contains(needle.as_str()) {
                return Err(DataDictError::enrichment("stubbed failure"));
            }
        }
        Ok(format!("generated #{}", n))
    }
}
