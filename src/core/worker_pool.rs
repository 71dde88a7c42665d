// src/core/worker_pool.rs
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Backlog and limits for one task name
struct TaskQueue {
    jobs: VecDeque<Job>,
    running: usize,
    limit: usize,
}

impl TaskQueue {
    fn new(limit: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            running: 0,
            limit,
        }
    }

    fn runnable(&self) -> bool {
        !self.jobs.is_empty() && self.running < self.limit
    }
}

#[derive(Default)]
struct PoolState {
    queues: HashMap<String, TaskQueue>,
    /// Task names in first-seen order, walked round-robin
    order: Vec<String>,
    cursor: usize,
}

impl PoolState {
    /// Pop the next job, rotating across task names so none starves
    fn next_job(&mut self) -> Option<(String, Job)> {
        let len = self.order.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            let name = &self.order[idx];
            if let Some(queue) = self.queues.get_mut(name) {
                if queue.runnable() {
                    if let Some(job) = queue.jobs.pop_front() {
                        queue.running += 1;
                        self.cursor = (idx + 1) % len;
                        return Some((name.clone(), job));
                    }
                }
            }
        }
        None
    }

    fn is_idle(&self) -> bool {
        self.queues.values().all(|q| q.jobs.is_empty())
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    notify: Notify,
    shutdown: AtomicBool,
    default_limit: usize,
}

/// Bounded executor for module work.
///
/// A fixed set of persistent workers pull from named sub-queues. Each task
/// name may run at most its limit of jobs at once (the default limit is
/// applied to names with no explicit setting), which keeps one module's
/// events in order while different modules run side by side.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool with `max_workers` workers. Must be called inside a tokio runtime.
    pub fn new(max_workers: usize, default_limit: usize) -> Self {
        let max_workers = max_workers.max(1);
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState::default()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            default_limit: default_limit.max(1),
        });

        let workers = (0..max_workers)
            .map(|id| tokio::spawn(worker_loop(id, inner.clone())))
            .collect();

        debug!("Worker pool started with {} workers", max_workers);

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Cap how many jobs under `task_name` may execute at once
    pub fn set_task_limit(&self, task_name: &str, limit: usize) {
        let mut state = self.inner.state.lock();
        let limit = limit.max(1);
        match state.queues.get_mut(task_name) {
            Some(queue) => queue.limit = limit,
            None => {
                state.queues.insert(task_name.to_string(), TaskQueue::new(limit));
                state.order.push(task_name.to_string());
            }
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Queue a job and return immediately. Dropped silently once shutdown began.
    pub fn submit<F>(&self, task_name: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            debug!("Worker pool is shutting down, dropping job for {}", task_name);
            return;
        }

        let mut state = self.inner.state.lock();
        if !state.queues.contains_key(task_name) {
            state.queues.insert(task_name.to_string(), TaskQueue::new(self.inner.default_limit));
            state.order.push(task_name.to_string());
        }
        if let Some(queue) = state.queues.get_mut(task_name) {
            queue.jobs.push_back(Box::pin(job));
        }
        drop(state);

        self.inner.notify.notify_waiters();
    }

    /// Jobs waiting or executing under `task_name`
    pub fn queued_count(&self, task_name: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .queues
            .get(task_name)
            .map(|q| q.jobs.len() + q.running)
            .unwrap_or(0)
    }

    /// Jobs waiting or executing across every task name
    pub fn total_queued(&self) -> usize {
        let state = self.inner.state.lock();
        state.queues.values().map(|q| q.jobs.len() + q.running).sum()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Stop accepting work. With `wait`, queued jobs still run and this
    /// returns once every worker exited; otherwise queued jobs are dropped
    /// and in-flight ones are left to finish on their own.
    pub async fn shutdown(&self, wait: bool) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) && !wait {
            return;
        }

        if !wait {
            let mut state = self.inner.state.lock();
            let dropped: usize = state.queues.values().map(|q| q.jobs.len()).sum();
            for queue in state.queues.values_mut() {
                queue.jobs.clear();
            }
            if dropped > 0 {
                info!("Worker pool shutdown dropped {} queued jobs", dropped);
            }
        }
        self.inner.notify.notify_waiters();

        if wait {
            let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Worker exited abnormally: {}", e);
                }
            }
            debug!("Worker pool drained");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.state.lock().queues.values_mut().for_each(|q| q.jobs.clear());
        self.inner.notify.notify_waiters();
    }
}

async fn worker_loop(id: usize, inner: Arc<PoolInner>) {
    loop {
        // Register interest before inspecting state so a submit between the
        // check and the await still wakes this worker.
        let notified = inner.notify.notified();

        let next = {
            let mut state = inner.state.lock();
            match state.next_job() {
                Some(next) => Some(next),
                None if inner.shutdown.load(Ordering::SeqCst) && state.is_idle() => break,
                None => None,
            }
        };

        let Some((task_name, job)) = next else {
            notified.await;
            continue;
        };

        // Run each job in its own task so a panic stays contained.
        if let Err(e) = tokio::spawn(job).await {
            if e.is_panic() {
                error!("Worker {} caught a panic in task {}", id, task_name);
            } else {
                error!("Worker {} lost task {}: {}", id, task_name, e);
            }
        }

        let mut state = inner.state.lock();
        if let Some(queue) = state.queues.get_mut(&task_name) {
            queue.running = queue.running.saturating_sub(1);
        }
        drop(state);
        inner.notify.notify_waiters();
    }

    debug!("Worker {} exiting", id);
}
