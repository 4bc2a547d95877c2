//! Job Handler Registry
//!
//! Maps job names (e.g. "advance_bracket") to async closures. The ring only knows how to
//! find a record and store a result; what a job does to the record is up to the handler.

use super::types::Job;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async job handler. Receives the job with its record and resolves to the
/// value that replaces the record.
pub type JobHandlerFn =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

pub struct JobRegistry {
    handlers: DashMap<String, JobHandlerFn>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` under `name`, replacing any previous handler of that name.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler_fn: JobHandlerFn = Arc::new(move |job: Job| {
            Box::pin(handler(job)) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        });

        self.handlers.insert(name.to_string(), handler_fn);

        tracing::info!("Registered job handler: {}", name);
    }

    /// Runs the handler named by the job.
    ///
    /// # Returns
    /// * `Ok(value)` - the handler's output.
    /// * `Err` - the handler failed or no handler has that name.
    pub async fn execute(&self, job: &Job) -> Result<Value> {
        // Clone the handler out so no map guard is held while it runs.
        let handler_fn = self
            .handlers
            .get(&job.handler)
            .map(|entry| entry.value().clone());

        match handler_fn {
            Some(handler_fn) => {
                tracing::debug!(
                    "Executing job {} with handler '{}' on key {}",
                    job.id.0,
                    job.handler,
                    job.key
                );
                handler_fn(job.clone()).await
            }
            None => {
                let error = format!("Unknown job handler: {}", job.handler);
                tracing::error!("{}", error);
                Err(anyhow::anyhow!(error))
            }
        }
    }

    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
