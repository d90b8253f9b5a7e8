//! Render task scheduler
//!
//! Bounds the number of concurrent calls into the rendering backend and
//! starts the highest-priority pending work first. Cancellation is checked
//! when a task is dequeued; once work has been handed to the backend it runs
//! until it settles (or hits the task timeout).

use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::{RenderError, RenderResult};
use crate::priority::{PendingQueue, Priority, TaskId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Delivery = Box<dyn FnOnce() + Send>;
type Waiters<T> = Arc<Mutex<Vec<oneshot::Sender<RenderResult<T>>>>>;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total enqueue calls, including ones that joined an existing task
    pub submitted: u64,

    /// Tasks handed to the backend
    pub started: u64,

    /// Tasks that produced a value
    pub completed: u64,

    /// Tasks whose work returned an error
    pub failed: u64,

    /// Tasks settled as aborted without producing a value
    pub aborted: u64,

    /// Tasks that exceeded the task timeout
    pub timed_out: u64,

    /// Enqueue calls collapsed into an existing task with the same key
    pub deduplicated: u64,

    /// Tasks currently queued
    pub queued: usize,

    /// Tasks currently running
    pub running: usize,
}

/// Handle to the eventual result of an enqueued task
///
/// Resolves to `Err(RenderError::Aborted)` if the task was cancelled before
/// dispatch, dropped by `clear`/`cancel_below_priority`, or panicked.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<RenderResult<T>>,
}

impl<T> TaskHandle<T> {
    fn new(rx: oneshot::Receiver<RenderResult<T>>) -> Self {
        Self { rx }
    }

    fn settled(result: RenderResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = RenderResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RenderError::Aborted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum Outcome {
    Completed,
    Failed,
    Aborted,
    TimedOut,
}

/// Type-erased unit of work sitting in the queue
trait Job: Send {
    /// Run the work and hand back a closure that delivers its result
    fn run(self: Box<Self>, timeout: Option<Duration>) -> BoxFuture<(Outcome, Delivery)>;

    /// Settle every waiter as aborted without running the work
    fn abort(self: Box<Self>);
}

struct Task<T, F> {
    work: F,
    waiters: Waiters<T>,
    deliver: fn(Vec<oneshot::Sender<RenderResult<T>>>, RenderResult<T>),
}

impl<T, F, Fut> Job for Task<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = RenderResult<T>> + Send + 'static,
{
    fn run(self: Box<Self>, timeout: Option<Duration>) -> BoxFuture<(Outcome, Delivery)> {
        let Task {
            work,
            waiters,
            deliver,
        } = *self;

        Box::pin(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, work()).await {
                    Ok(result) => result,
                    Err(_) => Err(RenderError::TimedOut(limit)),
                },
                None => work().await,
            };

            let outcome = match &result {
                Ok(_) => Outcome::Completed,
                Err(RenderError::Aborted) => Outcome::Aborted,
                Err(RenderError::TimedOut(_)) => Outcome::TimedOut,
                Err(RenderError::Backend(_)) => Outcome::Failed,
            };

            let delivery: Delivery = Box::new(move || {
                let senders = std::mem::take(&mut *waiters.lock());
                deliver(senders, result);
            });
            (outcome, delivery)
        })
    }

    fn abort(self: Box<Self>) {
        let senders = std::mem::take(&mut *self.waiters.lock());
        for sender in senders {
            let _ = sender.send(Err(RenderError::Aborted));
        }
    }
}

fn deliver_one<T>(senders: Vec<oneshot::Sender<RenderResult<T>>>, result: RenderResult<T>) {
    if let Some(sender) = senders.into_iter().next() {
        let _ = sender.send(result);
    }
}

fn deliver_all<T: Clone>(
    mut senders: Vec<oneshot::Sender<RenderResult<T>>>,
    result: RenderResult<T>,
) {
    let Some(last) = senders.pop() else {
        return;
    };
    for sender in senders {
        let _ = sender.send(result.clone());
    }
    let _ = last.send(result);
}

struct Queued {
    tokens: Vec<CancellationToken>,
    key: Option<String>,
    job: Box<dyn Job>,
}

struct KeyedTask {
    id: TaskId,
    // Waiters<T> for the task's result type
    waiters: Box<dyn Any + Send>,
}

struct SchedulerState {
    queue: PendingQueue<Queued>,
    running: usize,
    next_id: TaskId,
    keyed: HashMap<String, KeyedTask>,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn allocate_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn forget_key(&mut self, key: &str, id: TaskId) {
        if self.keyed.get(key).is_some_and(|task| task.id == id) {
            self.keyed.remove(key);
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl Inner {
    /// Start queued work until every slot is busy or the queue is empty
    fn dispatch(inner: &Arc<Inner>) {
        let mut aborted = Vec::new();
        let mut launches = Vec::new();

        {
            let mut state = inner.state.lock();
            while state.running < inner.config.max_concurrency {
                let Some(pending) = state.queue.pop_front() else {
                    break;
                };
                let Queued { tokens, key, job } = pending.item;

                if tokens.iter().all(CancellationToken::is_cancelled) {
                    if let Some(key) = &key {
                        state.forget_key(key, pending.id);
                    }
                    state.stats.aborted += 1;
                    trace!(task = pending.id, "dropping cancelled render task");
                    aborted.push(job);
                    continue;
                }

                state.running += 1;
                state.stats.started += 1;
                debug!(
                    task = pending.id,
                    priority = %pending.priority,
                    running = state.running,
                    queued = state.queue.len(),
                    "dispatching render task"
                );
                launches.push((pending.id, key, job));
            }
        }

        for job in aborted {
            job.abort();
        }
        for (id, key, job) in launches {
            Inner::launch(inner, id, key, job);
        }
    }

    fn launch(inner: &Arc<Inner>, id: TaskId, key: Option<String>, job: Box<dyn Job>) {
        let mut slot = SlotGuard {
            inner: Arc::clone(inner),
            id,
            key,
            released: false,
        };
        let future = job.run(inner.config.task_timeout);

        tokio::spawn(async move {
            let (outcome, delivery) = future.await;
            slot.release(Some(outcome));
            delivery();
        });
    }
}

/// Holds one concurrency slot for a running task
///
/// Dropping it without an explicit release (the task panicked) still frees
/// the slot and restarts dispatch.
struct SlotGuard {
    inner: Arc<Inner>,
    id: TaskId,
    key: Option<String>,
    released: bool,
}

impl SlotGuard {
    fn release(&mut self, outcome: Option<Outcome>) {
        if self.released {
            return;
        }
        self.released = true;

        {
            let mut state = self.inner.state.lock();
            match outcome {
                Some(Outcome::Completed) => state.stats.completed += 1,
                Some(Outcome::Failed) => state.stats.failed += 1,
                Some(Outcome::TimedOut) => state.stats.timed_out += 1,
                Some(Outcome::Aborted) | None => state.stats.aborted += 1,
            }
            if let Some(key) = self.key.take() {
                state.forget_key(&key, self.id);
            }
            state.running = state.running.saturating_sub(1);
        }

        Inner::dispatch(&self.inner);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            debug!(task = self.id, "render task ended without settling");
            self.release(None);
        }
    }
}

/// Priority scheduler for render work
///
/// Cloning is cheap; clones share the same queue and concurrency limit.
/// Enqueueing spawns onto the current Tokio runtime, so it must be called
/// from within one.
///
/// # Example
///
/// ```
/// use pdf_reader_scheduler::{CancellationToken, Priority, RenderScheduler};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scheduler = RenderScheduler::default();
/// let handle = scheduler.enqueue(
///     || async { Ok::<_, pdf_reader_scheduler::RenderError>(42) },
///     CancellationToken::new(),
///     Priority::VISIBLE,
/// );
/// assert_eq!(handle.await, Ok(42));
/// # }
/// ```
#[derive(Clone)]
pub struct RenderScheduler {
    inner: Arc<Inner>,
}

impl RenderScheduler {
    /// Create a scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        let config = SchedulerConfig {
            max_concurrency: config.max_concurrency.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SchedulerState {
                    queue: PendingQueue::new(),
                    running: 0,
                    next_id: 1,
                    keyed: HashMap::new(),
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Create a scheduler with a specific concurrency limit
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self::new(SchedulerConfig::default().with_max_concurrency(max_concurrency))
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Enqueue work
    ///
    /// If `token` is already cancelled the returned handle resolves to
    /// `Aborted` and `work` is never called.
    pub fn enqueue<T, F, Fut>(
        &self,
        work: F,
        token: CancellationToken,
        priority: Priority,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RenderResult<T>> + Send + 'static,
    {
        if token.is_cancelled() {
            self.record_early_abort();
            return TaskHandle::settled(Err(RenderError::Aborted));
        }

        let (tx, rx) = oneshot::channel();
        let job = Task {
            work,
            waiters: Arc::new(Mutex::new(vec![tx])),
            deliver: deliver_one::<T>,
        };

        {
            let mut state = self.inner.state.lock();
            state.stats.submitted += 1;
            let id = state.allocate_id();
            state.queue.insert(
                id,
                priority,
                Queued {
                    tokens: vec![token],
                    key: None,
                    job: Box::new(job),
                },
            );
            trace!(task = id, %priority, "enqueued render task");
        }

        Inner::dispatch(&self.inner);
        TaskHandle::new(rx)
    }

    /// Enqueue work under a deduplication key
    ///
    /// While a task for `key` is queued or running, further calls join it
    /// instead of creating a second backend call; every joiner receives a
    /// clone of the result. A joiner with a higher priority moves a still
    /// queued task forward. A joined queued task is dropped at dequeue only
    /// when every joined token has been cancelled.
    pub fn enqueue_keyed<T, F, Fut>(
        &self,
        key: impl Into<String>,
        work: F,
        token: CancellationToken,
        priority: Priority,
    ) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RenderResult<T>> + Send + 'static,
    {
        if token.is_cancelled() {
            self.record_early_abort();
            return TaskHandle::settled(Err(RenderError::Aborted));
        }

        let key = key.into();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.inner.state.lock();
            state.stats.submitted += 1;

            let existing = state.keyed.get(&key).and_then(|task| {
                task.waiters
                    .downcast_ref::<Waiters<T>>()
                    .map(|waiters| (task.id, Arc::clone(waiters)))
            });

            if let Some((id, waiters)) = existing {
                waiters.lock().push(tx);
                state.stats.deduplicated += 1;

                let escalate = match state.queue.get_mut(id) {
                    Some(pending) => {
                        pending.item.tokens.push(token);
                        priority > pending.priority
                    }
                    None => false,
                };
                if escalate {
                    if let Some(pending) = state.queue.remove(id) {
                        state.queue.insert(id, priority, pending.item);
                    }
                }
                trace!(task = id, key = %key, "joined in-flight render task");
                return TaskHandle::new(rx);
            }

            let id = state.allocate_id();
            let waiters: Waiters<T> = Arc::new(Mutex::new(vec![tx]));
            state.keyed.insert(
                key.clone(),
                KeyedTask {
                    id,
                    waiters: Box::new(Arc::clone(&waiters)),
                },
            );
            let job = Task {
                work,
                waiters,
                deliver: deliver_all::<T>,
            };
            state.queue.insert(
                id,
                priority,
                Queued {
                    tokens: vec![token],
                    key: Some(key),
                    job: Box::new(job),
                },
            );
            trace!(task = id, %priority, "enqueued keyed render task");
        }

        Inner::dispatch(&self.inner);
        TaskHandle::new(rx)
    }

    /// Drop every queued task with priority below `min_priority`
    ///
    /// Running tasks are unaffected. Returns the number of tasks dropped.
    pub fn cancel_below_priority(&self, min_priority: Priority) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state
                .queue
                .remove_where(|pending| pending.priority < min_priority);
            for pending in &removed {
                if let Some(key) = &pending.item.key {
                    state.forget_key(key, pending.id);
                }
            }
            state.stats.aborted += removed.len() as u64;
            removed
        };

        let count = removed.len();
        if count > 0 {
            debug!(count, %min_priority, "dropped low-priority render tasks");
        }
        for pending in removed {
            pending.item.job.abort();
        }
        count
    }

    /// Drop every queued task
    ///
    /// Running tasks are unaffected. Returns the number of tasks dropped.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.queue.drain();
            for pending in &removed {
                if let Some(key) = &pending.item.key {
                    state.forget_key(key, pending.id);
                }
            }
            state.stats.aborted += removed.len() as u64;
            removed
        };

        let count = removed.len();
        for pending in removed {
            pending.item.job.abort();
        }
        count
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of running tasks
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Snapshot of the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            queued: state.queue.len(),
            running: state.running,
            ..state.stats.clone()
        }
    }

    fn record_early_abort(&self) {
        let mut state = self.inner.state.lock();
        state.stats.submitted += 1;
        state.stats.aborted += 1;
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RenderScheduler")
            .field("max_concurrency", &self.inner.config.max_concurrency)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    /// Work that records its label on start and then waits for the gate
    fn gated(
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> (
        oneshot::Sender<()>,
        impl FnOnce() -> BoxFuture<RenderResult<&'static str>> + Send + 'static,
    ) {
        let (open, gate) = oneshot::channel::<()>();
        let work = move || -> BoxFuture<RenderResult<&'static str>> {
            Box::pin(async move {
                order.lock().push(label);
                let _ = gate.await;
                Ok(label)
            })
        };
        (open, work)
    }

    fn recording(
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> impl FnOnce() -> BoxFuture<RenderResult<&'static str>> + Send + 'static {
        move || -> BoxFuture<RenderResult<&'static str>> {
            Box::pin(async move {
                order.lock().push(label);
                Ok(label)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrency() {
        let scheduler = RenderScheduler::with_max_concurrency(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6u64)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                scheduler.enqueue(
                    move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10 + i)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    },
                    CancellationToken::new(),
                    Priority(100),
                )
            })
            .collect();

        assert_eq!(scheduler.running(), 2);
        assert_eq!(scheduler.pending(), 4);

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await, Ok(i as u64));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.stats().completed, 6);
    }

    #[tokio::test]
    async fn test_priority_order_after_slot_frees() {
        let scheduler = RenderScheduler::with_max_concurrency(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open_a, work_a) = gated("A", Arc::clone(&order));
        let (open_b, work_b) = gated("B", Arc::clone(&order));
        let a = scheduler.enqueue(work_a, CancellationToken::new(), Priority(1000));
        let b = scheduler.enqueue(work_b, CancellationToken::new(), Priority(100));
        let d = scheduler.enqueue(
            recording("D", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(10),
        );
        let c = scheduler.enqueue(
            recording("C", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(500),
        );

        settle().await;
        assert_eq!(*order.lock(), vec!["A", "B"]);
        assert_eq!(scheduler.pending(), 2);

        open_a.send(()).unwrap();
        assert_eq!(a.await, Ok("A"));
        assert_eq!(c.await, Ok("C"));
        assert_eq!(order.lock()[..3], ["A", "B", "C"]);

        open_b.send(()).unwrap();
        assert_eq!(b.await, Ok("B"));
        assert_eq!(d.await, Ok("D"));
        assert_eq!(*order.lock(), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_never_runs_work() {
        let scheduler = RenderScheduler::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let counter = Arc::clone(&calls);
        let handle = scheduler.enqueue(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            token,
            Priority::VISIBLE,
        );

        assert_eq!(handle.await, Err(RenderError::Aborted));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().aborted, 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_skips_slot() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));

        let token = CancellationToken::new();
        let cancelled = scheduler.enqueue(
            recording("cancelled", Arc::clone(&order)),
            token.clone(),
            Priority(500),
        );
        let next = scheduler.enqueue(
            recording("next", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(100),
        );

        token.cancel();
        open.send(()).unwrap();

        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(cancelled.await, Err(RenderError::Aborted));
        assert_eq!(next.await, Ok("next"));
        assert_eq!(*order.lock(), vec!["blocker", "next"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let scheduler = RenderScheduler::default();

        let failing = scheduler.enqueue(
            || async { Err::<u32, _>(RenderError::backend("page out of range")) },
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        let healthy = scheduler.enqueue(
            || async { Ok::<_, RenderError>(7u32) },
            CancellationToken::new(),
            Priority::VISIBLE,
        );

        assert_eq!(
            failing.await,
            Err(RenderError::Backend("page out of range".into()))
        );
        assert_eq!(healthy.await, Ok(7));

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_cancel_below_priority() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));
        let keep = scheduler.enqueue(
            recording("keep", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(500),
        );
        let low = scheduler.enqueue(
            recording("low", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(50),
        );
        let lower = scheduler.enqueue(
            recording("lower", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(10),
        );

        assert_eq!(scheduler.cancel_below_priority(Priority(100)), 2);
        assert_eq!(scheduler.running(), 1);

        open.send(()).unwrap();
        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(keep.await, Ok("keep"));
        assert_eq!(low.await, Err(RenderError::Aborted));
        assert_eq!(lower.await, Err(RenderError::Aborted));
        assert_eq!(*order.lock(), vec!["blocker", "keep"]);
    }

    #[tokio::test]
    async fn test_clear_aborts_queued_only() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, running) = gated("running", Arc::clone(&order));
        let running = scheduler.enqueue(running, CancellationToken::new(), Priority(1));
        let queued = scheduler.enqueue(
            recording("queued", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(1),
        );

        assert_eq!(scheduler.clear(), 1);
        assert_eq!(queued.await, Err(RenderError::Aborted));

        open.send(()).unwrap();
        assert_eq!(running.await, Ok("running"));
        assert_eq!(*order.lock(), vec!["running"]);
    }

    #[tokio::test]
    async fn test_keyed_requests_share_one_call() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));

        let make_work = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RenderError>(String::from("tile"))
            }
        };
        let first = scheduler.enqueue_keyed(
            "doc:0:512:0_0_256x256",
            make_work(Arc::clone(&calls)),
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        let second = scheduler.enqueue_keyed(
            "doc:0:512:0_0_256x256",
            make_work(Arc::clone(&calls)),
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        assert_eq!(scheduler.pending(), 1);

        open.send(()).unwrap();
        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(first.await, Ok(String::from("tile")));
        assert_eq!(second.await, Ok(String::from("tile")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().deduplicated, 1);

        // Once settled the key is free again.
        let third = scheduler.enqueue_keyed(
            "doc:0:512:0_0_256x256",
            make_work(Arc::clone(&calls)),
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        assert_eq!(third.await, Ok(String::from("tile")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keyed_task_survives_partial_cancellation() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));

        let token_a = CancellationToken::new();
        let token_b = CancellationToken::new();
        let a = scheduler.enqueue_keyed(
            "k",
            recording("shared", Arc::clone(&order)),
            token_a.clone(),
            Priority(100),
        );
        let b = scheduler.enqueue_keyed(
            "k",
            recording("unused", Arc::clone(&order)),
            token_b.clone(),
            Priority(100),
        );

        token_a.cancel();
        open.send(()).unwrap();

        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(a.await, Ok("shared"));
        assert_eq!(b.await, Ok("shared"));
        assert_eq!(*order.lock(), vec!["blocker", "shared"]);
    }

    #[tokio::test]
    async fn test_keyed_task_aborted_when_all_cancelled() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));

        let token_a = CancellationToken::new();
        let token_b = CancellationToken::new();
        let a = scheduler.enqueue_keyed(
            "k",
            recording("shared", Arc::clone(&order)),
            token_a.clone(),
            Priority(100),
        );
        let b = scheduler.enqueue_keyed(
            "k",
            recording("unused", Arc::clone(&order)),
            token_b.clone(),
            Priority(100),
        );

        token_a.cancel();
        token_b.cancel();
        open.send(()).unwrap();

        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(a.await, Err(RenderError::Aborted));
        assert_eq!(b.await, Err(RenderError::Aborted));
        assert_eq!(*order.lock(), vec!["blocker"]);
    }

    #[tokio::test]
    async fn test_keyed_join_escalates_priority() {
        let scheduler = RenderScheduler::with_max_concurrency(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (open, blocker) = gated("blocker", Arc::clone(&order));
        let blocker = scheduler.enqueue(blocker, CancellationToken::new(), Priority(1000));

        let prefetch = scheduler.enqueue_keyed(
            "tile",
            recording("tile", Arc::clone(&order)),
            CancellationToken::new(),
            Priority::OVERSCAN,
        );
        let other = scheduler.enqueue(
            recording("other", Arc::clone(&order)),
            CancellationToken::new(),
            Priority(500),
        );
        let visible = scheduler.enqueue_keyed(
            "tile",
            recording("unused", Arc::clone(&order)),
            CancellationToken::new(),
            Priority::VISIBLE,
        );

        open.send(()).unwrap();
        assert_eq!(blocker.await, Ok("blocker"));
        assert_eq!(visible.await, Ok("tile"));
        assert_eq!(prefetch.await, Ok("tile"));
        assert_eq!(other.await, Ok("other"));
        assert_eq!(*order.lock(), vec!["blocker", "tile", "other"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let scheduler = RenderScheduler::new(
            SchedulerConfig::default()
                .with_max_concurrency(1)
                .with_task_timeout(Some(Duration::from_secs(1))),
        );

        let slow = scheduler.enqueue(
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, RenderError>("slow")
            },
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        let next = scheduler.enqueue(
            || async { Ok::<_, RenderError>("next") },
            CancellationToken::new(),
            Priority::VISIBLE,
        );

        assert_eq!(
            slow.await,
            Err(RenderError::TimedOut(Duration::from_secs(1)))
        );
        assert_eq!(next.await, Ok("next"));
        assert_eq!(scheduler.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let scheduler = RenderScheduler::with_max_concurrency(1);

        let panicking = scheduler.enqueue(
            || async {
                if true {
                    panic!("backend crashed");
                }
                Ok::<u8, RenderError>(0)
            },
            CancellationToken::new(),
            Priority::VISIBLE,
        );
        let next = scheduler.enqueue(
            || async { Ok::<u8, RenderError>(1) },
            CancellationToken::new(),
            Priority::VISIBLE,
        );

        assert_eq!(panicking.await, Err(RenderError::Aborted));
        assert_eq!(next.await, Ok(1));
        assert_eq!(scheduler.running(), 0);
    }
}
