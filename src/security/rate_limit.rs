use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const GLOBAL_KEY: &str = "global";

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

fn default_per_minute() -> usize {
    60
}
fn default_per_hour() -> usize {
    1000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: usize,
    #[serde(default = "default_per_hour")]
    pub per_hour: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Minute,
    Hour,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        retry_after: Duration,
        window: WindowKind,
        limit: usize,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Caller-facing text for a denial, in whole seconds (at least one).
pub fn denial_message(limit: usize, window: WindowKind, retry_after: Duration) -> String {
    format!(
        "Rate limit exceeded: {limit} calls/{window}. Retry in {}s",
        retry_after.as_secs().max(1)
    )
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimitStats {
    pub endpoint: String,
    pub calls_last_minute: usize,
    pub calls_last_hour: usize,
    pub limit_per_minute: usize,
    pub limit_per_hour: usize,
    pub minute_remaining: usize,
    pub hour_remaining: usize,
    pub tracked_endpoints: usize,
}

#[derive(Debug, Default)]
struct EndpointWindows {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

// Entries are appended in time order, so expiry is always a prefix.
fn purge(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.saturating_duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn live_count(deque: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    deque
        .iter()
        .filter(|&&t| now.saturating_duration_since(t) < window)
        .count()
}

fn retry_after(deque: &VecDeque<Instant>, now: Instant, window: Duration) -> Duration {
    match deque.front() {
        Some(&oldest) => window.saturating_sub(now.saturating_duration_since(oldest)),
        None => window,
    }
}

/// Per-endpoint sliding-window limiter with independent minute and hour
/// budgets.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    inner: Arc<Mutex<HashMap<String, EndpointWindows>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now()).await
    }

    /// Admission decision against an explicit clock reading. `now` must not go
    /// backwards between calls for the same key.
    pub async fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut map = self.inner.lock().await;
        let windows = map.entry(key.to_string()).or_default();
        purge(&mut windows.minute, now, MINUTE);
        purge(&mut windows.hour, now, HOUR);

        let decision = if windows.minute.len() >= self.config.per_minute {
            Admission::Denied {
                retry_after: retry_after(&windows.minute, now, MINUTE),
                window: WindowKind::Minute,
                limit: self.config.per_minute,
            }
        } else if windows.hour.len() >= self.config.per_hour {
            Admission::Denied {
                retry_after: retry_after(&windows.hour, now, HOUR),
                window: WindowKind::Hour,
                limit: self.config.per_hour,
            }
        } else {
            windows.minute.push_back(now);
            windows.hour.push_back(now);
            Admission::Allowed
        };

        match decision {
            Admission::Allowed => debug!(
                endpoint = key,
                minute = windows.minute.len(),
                hour = windows.hour.len(),
                "request admitted"
            ),
            Admission::Denied {
                retry_after,
                window,
                ..
            } => warn!(
                endpoint = key,
                %window,
                retry_after_ms = retry_after.as_millis() as u64,
                "request denied by rate limiter"
            ),
        }
        decision
    }

    /// Snapshot for diagnostics; never purges or records. `"global"` sums all
    /// endpoints.
    pub async fn stats(&self, key: &str) -> RateLimitStats {
        let now = Instant::now();
        let map = self.inner.lock().await;
        let (minute, hour) = if key == GLOBAL_KEY {
            map.values().fold((0, 0), |(m, h), w| {
                (
                    m + live_count(&w.minute, now, MINUTE),
                    h + live_count(&w.hour, now, HOUR),
                )
            })
        } else {
            map.get(key)
                .map(|w| (live_count(&w.minute, now, MINUTE), live_count(&w.hour, now, HOUR)))
                .unwrap_or((0, 0))
        };
        RateLimitStats {
            endpoint: key.to_string(),
            calls_last_minute: minute,
            calls_last_hour: hour,
            limit_per_minute: self.config.per_minute,
            limit_per_hour: self.config.per_hour,
            minute_remaining: self.config.per_minute.saturating_sub(minute),
            hour_remaining: self.config.per_hour.saturating_sub(hour),
            tracked_endpoints: map.len(),
        }
    }
}
