//! Background dispatch for categorization.
//!
//! Small imports categorize inline; large ones hand categorization to a
//! detached task the request does not await. The registry keeps a handle per
//! task so callers may poll for completion by id, but nothing in the import
//! path assumes the task finishes before the request returns.

use crate::config::PipelineConfig;
use crate::models::ImportOptions;
use dashmap::DashMap;
use service_core::error::AppError;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Decide whether categorization runs in the background. Explicit request
/// wins; otherwise a large inserted count or an oversized raw batch tips the
/// decision, and only when AI categorization is on (the rule phase alone is
/// cheap enough to run inline at any size).
pub fn should_dispatch_background(
    options: &ImportOptions,
    inserted: usize,
    batch_size: usize,
    config: &PipelineConfig,
) -> bool {
    if options.background_categorization {
        return true;
    }
    if !options.ai_categorization {
        return false;
    }
    inserted > config.large_import_threshold || batch_size > config.medium_batch_threshold
}

/// What a finished background pass reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundOutcome {
    pub categorized: u64,
    pub propagated: u64,
}

/// Poll result for a background task id.
#[derive(Debug)]
pub enum TaskStatus {
    Running,
    Completed(BackgroundOutcome),
    Failed(String),
    /// Never spawned here, or already polled to completion.
    Unknown,
}

type TaskHandle = JoinHandle<Result<BackgroundOutcome, AppError>>;

/// Registry of detached categorization tasks, keyed by a caller-visible id.
#[derive(Default)]
pub struct BackgroundRegistry {
    tasks: DashMap<Uuid, TaskHandle>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a detached task and return its id. The task runs to completion
    /// whether or not anyone polls it.
    pub fn spawn<F>(&self, task: F) -> Uuid
    where
        F: Future<Output = Result<BackgroundOutcome, AppError>> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let handle = tokio::spawn(task);
        self.tasks.insert(task_id, handle);
        info!(task_id = %task_id, "Background categorization dispatched");
        task_id
    }

    /// Poll a task by id. A finished task is consumed by the first poll that
    /// observes it; later polls report `Unknown`.
    pub async fn poll(&self, task_id: Uuid) -> TaskStatus {
        let finished = match self.tasks.get(&task_id) {
            Some(handle) => handle.is_finished(),
            None => return TaskStatus::Unknown,
        };

        if !finished {
            return TaskStatus::Running;
        }

        let Some((_, handle)) = self.tasks.remove(&task_id) else {
            return TaskStatus::Unknown;
        };

        match handle.await {
            Ok(Ok(outcome)) => TaskStatus::Completed(outcome),
            Ok(Err(e)) => TaskStatus::Failed(e.to_string()),
            Err(join_error) => TaskStatus::Failed(join_error.to_string()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn options(background: bool, ai: bool) -> ImportOptions {
        ImportOptions {
            background_categorization: background,
            skip_history_dedup: false,
            ai_categorization: ai,
        }
    }

    #[test]
    fn test_explicit_flag_always_dispatches() {
        assert!(should_dispatch_background(
            &options(true, false),
            1,
            1,
            &config()
        ));
    }

    #[test]
    fn test_large_insert_count_with_ai_dispatches() {
        assert!(should_dispatch_background(
            &options(false, true),
            120,
            120,
            &config()
        ));
    }

    #[test]
    fn test_oversized_batch_with_ai_dispatches() {
        assert!(should_dispatch_background(
            &options(false, true),
            50,
            300,
            &config()
        ));
    }

    #[test]
    fn test_small_import_stays_inline() {
        assert!(!should_dispatch_background(
            &options(false, true),
            40,
            60,
            &config()
        ));
    }

    #[test]
    fn test_no_ai_means_no_background() {
        assert!(!should_dispatch_background(
            &options(false, false),
            10_000,
            10_000,
            &config()
        ));
    }

    #[tokio::test]
    async fn test_registry_poll_lifecycle() {
        let registry = BackgroundRegistry::new();
        let task_id = registry.spawn(async {
            Ok(BackgroundOutcome {
                categorized: 5,
                propagated: 2,
            })
        });

        // Wait for the detached task to finish before polling.
        while registry.active_count() > 0 {
            match registry.poll(task_id).await {
                TaskStatus::Running => tokio::task::yield_now().await,
                TaskStatus::Completed(outcome) => {
                    assert_eq!(outcome.categorized, 5);
                    assert_eq!(outcome.propagated, 2);
                    break;
                }
                other => panic!("unexpected status: {other:?}"),
            }
        }

        assert!(matches!(registry.poll(task_id).await, TaskStatus::Unknown));
    }

    #[tokio::test]
    async fn test_registry_reports_task_failure() {
        let registry = BackgroundRegistry::new();
        let task_id = registry.spawn(async {
            Err(AppError::ClassifierError(anyhow::anyhow!("model offline")))
        });

        loop {
            match registry.poll(task_id).await {
                TaskStatus::Running => tokio::task::yield_now().await,
                TaskStatus::Failed(message) => {
                    assert!(message.contains("model offline"));
                    break;
                }
                other => panic!("unexpected status: {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_task_id() {
        let registry = BackgroundRegistry::new();
        let status = futures::executor::block_on(registry.poll(Uuid::new_v4()));
        assert!(matches!(status, TaskStatus::Unknown));
    }
}
