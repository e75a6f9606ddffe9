use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::error::Result;

/// One chapter's unit of work. Built once per selected chapter and consumed
/// exactly once by a worker.
#[derive(Debug, Clone)]
pub struct ChapterTask {
    /// Original 1-based chapter number, stable across the run.
    pub index: usize,
    pub title: String,
    pub text: String,
}

/// Outcome of one task, re-associated with its chapter via `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterResult {
    pub index: usize,
    pub success: bool,
}

/// Cooperative cancellation flag shared between the caller and the workers.
/// Once set, workers stop claiming tasks; in-flight tasks finish naturally.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run every task on a fixed pool of `worker_count` threads and collect one
/// result per claimed task, in completion order.
///
/// Each worker pulls the next unclaimed task from a shared queue until the
/// queue is drained or `cancel` is set. A task that panics is contained at
/// the task boundary and reported as a failed result; it never takes the
/// pool or other in-flight tasks down with it.
pub fn dispatch<F>(
    tasks: Vec<ChapterTask>,
    worker_count: usize,
    cancel: &CancelToken,
    exec: F,
) -> Result<Vec<ChapterResult>>
where
    F: Fn(&ChapterTask) -> bool + Send + Sync,
{
    let worker_count = worker_count.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .thread_name(|i| format!("worker-{i}"))
        .build()?;

    let queue = Mutex::new(VecDeque::from(tasks));
    let (tx, rx) = mpsc::channel::<ChapterResult>();

    pool.scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            let exec = &exec;
            scope.spawn(move |_| {
                loop {
                    if cancel.is_cancelled() {
                        debug!("cancellation requested, worker stops claiming tasks");
                        break;
                    }
                    let task = match queue.lock().unwrap().pop_front() {
                        Some(task) => task,
                        None => break,
                    };
                    let success = catch_unwind(AssertUnwindSafe(|| exec(&task)))
                        .unwrap_or_else(|payload| {
                            error!(
                                "chapter {} ({}) worker panicked: {}",
                                task.index,
                                task.title,
                                panic_message(payload.as_ref())
                            );
                            false
                        });
                    if tx
                        .send(ChapterResult {
                            index: task.index,
                            success,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    Ok(rx.into_iter().collect())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tasks(n: usize) -> Vec<ChapterTask> {
        (1..=n)
            .map(|index| ChapterTask {
                index,
                title: format!("Chapter {index}"),
                text: "text".to_string(),
            })
            .collect()
    }

    #[test]
    fn every_task_yields_exactly_one_result() {
        let cancel = CancelToken::new();
        let results = dispatch(tasks(25), 4, &cancel, |task| task.index % 3 != 0).unwrap();

        assert_eq!(results.len(), 25);
        let indices: HashSet<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices.len(), 25, "duplicated or missing index");
        for result in &results {
            assert_eq!(result.success, result.index % 3 != 0);
        }
    }

    #[test]
    fn panicking_task_does_not_poison_the_pool() {
        let cancel = CancelToken::new();
        let results = dispatch(tasks(5), 2, &cancel, |task| {
            if task.index == 3 {
                panic!("backend exploded");
            }
            true
        })
        .unwrap();

        assert_eq!(results.len(), 5);
        for result in results {
            assert_eq!(result.success, result.index != 3);
        }
    }

    #[test]
    fn cancellation_stops_new_task_claims() {
        let cancel = CancelToken::new();
        let results = dispatch(tasks(8), 1, &cancel, |_| {
            cancel.cancel();
            true
        })
        .unwrap();

        // The in-flight task finished; nothing new was claimed.
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[test]
    fn more_workers_than_tasks_is_fine() {
        let cancel = CancelToken::new();
        let results = dispatch(tasks(2), 8, &cancel, |_| true).unwrap();
        assert_eq!(results.len(), 2);
    }
}
