//! PDF Reader Scheduler Library
//!
//! Priority scheduler that bounds concurrent calls into the rendering
//! backend.
//!
//! Pending work is ordered by priority (visible tiles before placeholders
//! before overscan tiles) with FIFO ordering within each priority level.
//! Every request carries a cancellation token that is checked when the
//! request is dequeued; work already running is never interrupted.
//!
//! # Example
//!
//! ```
//! use pdf_reader_scheduler::{CancellationRegistry, Priority, RenderError, RenderScheduler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = RenderScheduler::with_max_concurrency(2);
//! let requests = CancellationRegistry::new();
//!
//! // A newer request for the same tile supersedes the older one.
//! let stale = requests.issue("doc-a:0:0_0");
//! let fresh = requests.issue("doc-a:0:0_0");
//!
//! let stale = scheduler.enqueue(|| async { Ok(1) }, stale, Priority::VISIBLE);
//! let fresh = scheduler.enqueue(|| async { Ok(2) }, fresh, Priority::VISIBLE);
//!
//! assert_eq!(stale.await, Err(RenderError::Aborted));
//! assert_eq!(fresh.await, Ok(2));
//! # }
//! ```

mod cancel;
mod config;
mod error;
mod priority;
mod scheduler;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use config::{SchedulerConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_TASK_TIMEOUT};
pub use error::{RenderError, RenderResult};
pub use priority::{Pending, PendingQueue, Priority, TaskId};
pub use scheduler::{RenderScheduler, SchedulerStats, TaskHandle};
