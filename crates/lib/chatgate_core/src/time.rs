//! Clock and sleep seams.
//!
//! Business logic takes the current time as a parameter and sleeps through a
//! [`Sleeper`], so tests can run the retry loop without real delays.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

/// Current wall-clock time as unix seconds.
pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// Something that can pause the current task.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
