//! Bounded job queue and the worker tasks that drain it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::handler::{CommandError, CommandResult, Executor};
use crate::webhook::payload::{PrEvent, WebhookEvent};

#[derive(Debug)]
pub struct WebhookJob {
    pub event: WebhookEvent,
    pub enqueued_at: Instant,
}

impl WebhookJob {
    pub fn new(event: WebhookEvent) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
        }
    }
}

pub fn channel(capacity: usize) -> (mpsc::Sender<WebhookJob>, mpsc::Receiver<WebhookJob>) {
    mpsc::channel(capacity.max(1))
}

/// Metrics label for a finished job.
pub fn outcome_label(result: &CommandResult) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(e) if e.is_commented() => "refused",
        Err(CommandError::Invalid(_)) => "invalid",
        Err(_) => "error",
    }
}

/// Run one event to completion.
pub async fn process_event(executor: &Executor, event: &WebhookEvent) -> CommandResult {
    let result = match event {
        WebhookEvent::Comment(job) => executor.execute(job).await,
        WebhookEvent::PullRequest(pr_event) => dispatch_workflow(executor, pr_event).await,
    };
    executor.metrics().job(outcome_label(&result));
    result
}

async fn dispatch_workflow(executor: &Executor, event: &PrEvent) -> CommandResult {
    let Some(config) = executor.config().webhook.pr_events.as_ref() else {
        info!("Pull request events are disabled, ignoring {}", event.target);
        return Ok(());
    };
    let client = executor
        .factory()
        .client(&event.target, event.event_id.as_deref())?;
    info!(
        "Dispatching {} on {} for {} ({})",
        config.workflow_file, config.workflow_ref, event.target, event.action
    );
    client
        .dispatch_workflow(
            &config.workflow_file,
            &config.workflow_ref,
            &event.inputs(&config.inputs),
        )
        .await?;
    Ok(())
}

/// Fixed set of tasks sharing one receiver.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        receiver: mpsc::Receiver<WebhookJob>,
        executor: Arc<Executor>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    receiver.clone(),
                    executor.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        info!("Started {} webhook workers", workers.max(1));
        Self { handles, cancel }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for the workers to drain the queue once every sender is gone.
    /// Returns false when `grace` ran out and the workers were stopped.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self { handles, cancel } = self;
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(grace, join_all(handles)).await {
            Ok(_) => {
                info!("Webhook workers drained the queue");
                true
            }
            Err(_) => {
                warn!(
                    "Workers did not drain the queue within {:?}, stopping them",
                    grace
                );
                cancel.cancel();
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WebhookJob>>>,
    executor: Arc<Executor>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        let target = job.event.target().clone();
        info!(
            "Worker {} picked up {} after {:?} in queue",
            id,
            target,
            job.enqueued_at.elapsed()
        );
        match process_event(&executor, &job.event).await {
            Ok(()) => info!("Worker {} finished {}", id, target),
            Err(e) if e.is_commented() => info!("Worker {} finished {}: {}", id, target, e),
            Err(e) => error!("Worker {} failed on {}: {}", id, target, e),
        }
    }
    info!("Worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::handler::CommandJob;
    use crate::metrics::Metrics;
    use crate::platform::PrTarget;
    use crate::testing::{self, FakeFactory, FakePlatform};

    fn executor(platform: Arc<FakePlatform>, vars: &[(&str, &str)]) -> Arc<Executor> {
        Arc::new(Executor::from_config(
            Arc::new(FakeFactory::new(platform)),
            Arc::new(testing::config(vars).unwrap()),
            Arc::new(Metrics::new()),
        ))
    }

    fn help_job() -> WebhookJob {
        WebhookJob::new(WebhookEvent::Comment(CommandJob {
            target: PrTarget::new("acme", "widgets", 1),
            commenter: "alice".to_string(),
            body: "/help".to_string(),
            event_id: None,
        }))
    }

    #[tokio::test]
    async fn test_pool_drains_queue_on_shutdown() {
        let platform = Arc::new(FakePlatform::new(testing::pull_request(1, "dave")));
        let executor = executor(platform.clone(), &[]);
        let (sender, receiver) = channel(8);
        let pool = WorkerPool::spawn(2, receiver, executor.clone());
        assert_eq!(pool.size(), 2);

        for _ in 0..5 {
            sender.send(help_job()).await.unwrap();
        }
        drop(sender);

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(platform.posted_comments().len(), 5);
        assert_eq!(executor.metrics().command_count("help", "ok"), 5);
    }

    #[tokio::test]
    async fn test_pr_event_dispatches_workflow() {
        let platform = Arc::new(FakePlatform::new(testing::pull_request(1, "dave")));
        let executor = executor(
            platform.clone(),
            &[
                ("WEBHOOK_PR_EVENT_ENABLED", "true"),
                ("WEBHOOK_WORKFLOW_FILE", "pr.yml"),
                ("WEBHOOK_WORKFLOW_REF", "trunk"),
                ("WEBHOOK_WORKFLOW_INPUTS", "suite=full"),
            ],
        );
        let event = WebhookEvent::PullRequest(PrEvent {
            target: PrTarget::new("acme", "widgets", 1),
            action: "opened".to_string(),
            head_ref: "feature".to_string(),
            head_sha: "abc123".to_string(),
            base_ref: "main".to_string(),
            sender: "alice".to_string(),
            event_id: None,
        });

        process_event(&executor, &event).await.unwrap();

        let dispatched = platform.dispatched();
        assert_eq!(dispatched.len(), 1);
        let (file, git_ref, inputs) = &dispatched[0];
        assert_eq!(file, "pr.yml");
        assert_eq!(git_ref, "trunk");
        let expected: BTreeMap<String, String> = [
            ("base_ref", "main"),
            ("head_ref", "feature"),
            ("head_sha", "abc123"),
            ("pr_action", "opened"),
            ("pr_number", "1"),
            ("sender", "alice"),
            ("suite", "full"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(inputs, &expected);
    }

    #[test]
    fn test_outcome_label() {
        assert_eq!(outcome_label(&Ok(())), "ok");
        assert_eq!(
            outcome_label(&Err(CommandError::commented("no"))),
            "refused"
        );
        assert_eq!(
            outcome_label(&Err(CommandError::Invalid("bad".to_string()))),
            "invalid"
        );
    }
}
