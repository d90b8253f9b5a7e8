//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrent backend calls
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Default per-task timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Scheduler configuration
///
/// # Example
///
/// ```
/// use pdf_reader_scheduler::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::default()
///     .with_max_concurrency(4)
///     .with_task_timeout(Some(Duration::from_secs(5)));
/// assert_eq!(config.max_concurrency, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running against the backend at once
    pub max_concurrency: usize,

    /// Per-task timeout; `None` disables it
    #[serde(rename = "task_timeout_secs", with = "timeout_secs")]
    pub task_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: Some(DEFAULT_TASK_TIMEOUT),
        }
    }
}

impl SchedulerConfig {
    /// Set the concurrency limit (clamped to at least 1)
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the per-task timeout
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }
}

mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// A disabled timeout is written as `0` so it survives a reload
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.map_or(0.0, |duration| duration.as_secs_f64()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                Ok(Some(Duration::from_secs_f64(secs)))
            }
            Some(_) | None => Ok(None),
        }
    }
}
