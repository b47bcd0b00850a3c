//! In-process task broker standing in for a durable queue (§5, §6): three
//! logical queues (crawl, extract, analyze), exponential backoff retries
//! capped at 10 minutes with a 3-attempt ceiling, idempotency left to the
//! state machine rather than the broker.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::models::Phase;

pub const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(600);
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// One of the three logical queues tasks are routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Crawl,
    Extract,
    Analyze,
}

/// Named unit of work dispatched by `JobService`/`ProgressService` as a
/// company moves through phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    CrawlCompany { company_id: String },
    CrawlPage { company_id: String, url: String },
    ExtractEntities { company_id: String },
    AnalyzeContent { company_id: String },
    GenerateSummary { company_id: String },
}

impl Task {
    pub fn company_id(&self) -> &str {
        match self {
            Task::CrawlCompany { company_id }
            | Task::CrawlPage { company_id, .. }
            | Task::ExtractEntities { company_id }
            | Task::AnalyzeContent { company_id }
            | Task::GenerateSummary { company_id } => company_id,
        }
    }

    fn queue(&self) -> Queue {
        match self {
            Task::CrawlCompany { .. } | Task::CrawlPage { .. } => Queue::Crawl,
            Task::ExtractEntities { .. } => Queue::Extract,
            Task::AnalyzeContent { .. } | Task::GenerateSummary { .. } => Queue::Analyze,
        }
    }
}

/// The task that dispatching `phase` for a company means running, if any
/// (COMPLETED has none — there's nothing left to do).
pub fn phase_task(phase: Phase, company_id: &str) -> Option<Task> {
    let company_id = company_id.to_string();
    match phase {
        Phase::Queued | Phase::Crawling => Some(Task::CrawlCompany { company_id }),
        Phase::Extracting => Some(Task::ExtractEntities { company_id }),
        Phase::Analyzing => Some(Task::AnalyzeContent { company_id }),
        Phase::Generating => Some(Task::GenerateSummary { company_id }),
        Phase::Completed => None,
    }
}

/// A task as it sits in the broker, with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: String,
    pub task: Task,
    pub attempt: u32,
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BASE_BACKOFF.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    scaled.min(MAX_BACKOFF)
}

#[derive(Debug)]
struct Delayed {
    ready_at: Instant,
    queue: Queue,
    item: QueuedTask,
}

/// Backing queue implementation. An `InMemoryTaskBroker` is sufficient for
/// single-process deployments and tests; a Redis- or SQS-backed broker can
/// satisfy the same trait for multi-node deployments.
#[async_trait::async_trait]
pub trait TaskBroker: Send + Sync {
    async fn enqueue(&self, task: Task);
    /// Pop the next ready task off `queue`, if any (delayed retries that
    /// haven't reached their backoff deadline are not returned yet).
    async fn dequeue(&self, queue: Queue) -> Option<QueuedTask>;
    /// Re-enqueue `queued` with backoff applied to the next attempt, unless
    /// attempts are exhausted, in which case it is dropped and `false` is
    /// returned (the caller should fail the job).
    async fn retry(&self, queued: QueuedTask) -> bool;
    async fn queue_len(&self, queue: Queue) -> usize;
}

#[derive(Default)]
pub struct InMemoryTaskBroker {
    crawl: Mutex<VecDeque<QueuedTask>>,
    extract: Mutex<VecDeque<QueuedTask>>,
    analyze: Mutex<VecDeque<QueuedTask>>,
    delayed: Mutex<Vec<Delayed>>,
}

impl InMemoryTaskBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, queue: Queue) -> &Mutex<VecDeque<QueuedTask>> {
        match queue {
            Queue::Crawl => &self.crawl,
            Queue::Extract => &self.extract,
            Queue::Analyze => &self.analyze,
        }
    }

    /// Move any delayed retries whose backoff has elapsed back onto their
    /// target queue. Called opportunistically from `dequeue`.
    async fn promote_ready(&self) {
        let now = Instant::now();
        let mut delayed = self.delayed.lock().await;
        let (ready, pending): (Vec<_>, Vec<_>) = delayed.drain(..).partition(|d| d.ready_at <= now);
        *delayed = pending;
        drop(delayed);

        for d in ready {
            self.queue_for(d.queue).lock().await.push_back(d.item);
        }
    }
}

#[async_trait::async_trait]
impl TaskBroker for InMemoryTaskBroker {
    async fn enqueue(&self, task: Task) {
        let queued = QueuedTask {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.clone(),
            attempt: 0,
        };
        self.queue_for(task.queue()).lock().await.push_back(queued);
    }

    async fn dequeue(&self, queue: Queue) -> Option<QueuedTask> {
        self.promote_ready().await;
        self.queue_for(queue).lock().await.pop_front()
    }

    async fn retry(&self, mut queued: QueuedTask) -> bool {
        queued.attempt += 1;
        if queued.attempt >= MAX_ATTEMPTS {
            return false;
        }
        let queue = queued.task.queue();
        let ready_at = Instant::now() + backoff_for(queued.attempt);
        self.delayed.lock().await.push(Delayed { ready_at, queue, item: queued });
        true
    }

    async fn queue_len(&self, queue: Queue) -> usize {
        self.queue_for(queue).lock().await.len()
    }
}
