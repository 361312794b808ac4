use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use retrio::errors::{Result, RetrioError};
use retrio::sched::{JobRequest, SchedulerBackend};
use retrio::types::{JobId, JobStatus};

/// A fake scheduler backend that:
/// - records every submitted request
/// - hands out sequential job ids
/// - reports scripted states on poll
/// - can be told to reject submissions for specific nodes.
///
/// The recorder and state map are shared, so tests keep a
/// [`FakeScheduler::handle`] while the controller owns the backend itself.
#[derive(Clone, Default)]
pub struct FakeScheduler {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    submitted: Vec<JobRequest>,
    states: HashMap<JobId, JobStatus>,
    reject_slugs: HashSet<String>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        let scheduler = Self::default();
        scheduler.inner.lock().unwrap().next_id = 1000;
        scheduler
    }

    /// A second handle onto the same recorder/state.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Reject any submission whose node slug matches.
    pub fn reject(&self, slug: &str) {
        self.inner.lock().unwrap().reject_slugs.insert(slug.to_string());
    }

    /// Script the state reported for a job on poll.
    pub fn set_state(&self, job: JobId, status: JobStatus) {
        self.inner.lock().unwrap().states.insert(job, status);
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn submitted_slugs(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|r| r.node.slug())
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.inner.lock().unwrap().submitted.len()
    }

    /// Id assigned to the submitted node with this slug, if any.
    pub fn id_of(&self, slug: &str) -> Option<JobId> {
        let inner = self.inner.lock().unwrap();
        inner
            .submitted
            .iter()
            .position(|r| r.node.slug() == slug)
            .map(|pos| JobId(1000 + pos as u64 + 1))
    }
}

impl SchedulerBackend for FakeScheduler {
    fn submit(&mut self, request: &JobRequest) -> Result<JobId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_slugs.contains(&request.node.slug()) {
            return Err(RetrioError::Submission(format!(
                "fake scheduler rejected {}",
                request.job_name
            )));
        }
        inner.next_id += 1;
        let id = JobId(inner.next_id);
        inner.submitted.push(request.clone());
        Ok(id)
    }

    fn poll(&mut self, job: JobId) -> Result<Option<JobStatus>> {
        Ok(self.inner.lock().unwrap().states.get(&job).copied())
    }
}
