use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Cancelable repeating timer that drives a role's periodic behavior.
///
/// Each role owns exactly one alarm, stopped on every role change. The loop
/// runs on a dedicated task; `stop()` is cooperative and only observed
/// between iterations, so an in-flight sleep or action always completes.
/// An error returned by the action is logged and the loop keeps going.
pub struct ElectionAlarm {
    token: CancellationToken,
    min_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl ElectionAlarm {
    pub fn new(min_timeout_ms: u64, max_timeout_ms: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            min_timeout_ms,
            max_timeout_ms,
        }
    }

    /// Sleep a fresh randomized timeout, then run the action. Used by the
    /// follower: no legal contact before the timeout fires means act.
    pub fn start_before_timewait<F, Fut>(&self, action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.start(action, 0, true, true);
    }

    /// Run the action, then sleep a fresh randomized timeout. Used by the
    /// candidate: the first election fires immediately on entry.
    pub fn start_after_timewait<F, Fut>(&self, action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.start(action, 0, true, false);
    }

    pub fn start<F, Fut>(&self, mut action: F, interval_ms: u64, randomized: bool, fire_before: bool)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let (min, max) = (self.min_timeout_ms, self.max_timeout_ms);
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return;
                }

                let sleep_ms = interval_ms
                    + if randomized {
                        rand::thread_rng().gen_range(min..max)
                    } else {
                        0
                    };

                if fire_before {
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                }

                if let Err(e) = action().await {
                    tracing::warn!(error = %e, "alarm action failed");
                }

                if !fire_before {
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                }
            }
        });
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ElectionAlarm {
    fn drop(&mut self) {
        // A replaced role must not leak its timer task.
        self.token.cancel();
    }
}
