use super::types::{Job, JobId};
use crate::node::ChordNode;

use std::sync::Arc;
use tracing::{info, warn};

impl ChordNode {
    /// Accepts a job against a record held by this node and runs it in the background.
    ///
    /// Declines (returns `None`) when the handler is unknown or the record is not here.
    pub fn accept_job(self: &Arc<Self>, handler: &str, key: &str) -> Option<JobId> {
        if !self.jobs.has_handler(handler) {
            warn!("Job for unknown handler '{}' declined", handler);
            return None;
        }
        let Some(record) = self.get_local(key) else {
            warn!("Job '{}' declined: {} holds no record {}", handler, self.local, key);
            return None;
        };

        let job = Job {
            id: JobId::new(),
            handler: handler.to_string(),
            key: key.to_string(),
            record,
        };
        let job_id = job.id.clone();

        let node = self.clone();
        tokio::spawn(async move {
            node.run_job(job).await;
        });

        Some(job_id)
    }

    /// Runs a job and routes its result back to whichever node now owns the key.
    async fn run_job(&self, job: Job) {
        match self.jobs.execute(&job).await {
            Ok(result) => {
                info!("Job {} ('{}') on {} finished", job.id.0, job.handler, job.key);
                self.store_key(&job.key, result).await;
            }
            Err(e) => warn!("Job {} ('{}') failed: {:#}", job.id.0, job.handler, e),
        }
    }
}
