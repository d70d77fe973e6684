use std::future::Future;
use std::time::Duration;

use log::{debug, info};
use tokio::time;

use crate::error::{Error, Result};

/// Outcome of one polling attempt.
pub enum Attempt<T> {
    Ready(T),
    /// Not there yet; the string says why and is only logged.
    Pending(String),
    /// Stop polling now.
    Failed(Error),
}

/// Geometric backoff with a fixed number of attempts. Every attempt is preceded
/// by its delay: `base * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: usize,
    pub base: Duration,
}

impl Default for Backoff {
    /// 12 attempts from 64ms, a bit over four minutes in the worst case.
    fn default() -> Self {
        Self {
            attempts: 12,
            base: Duration::from_millis(64),
        }
    }
}

impl Backoff {
    /// Saturates at `Duration::MAX` rather than overflowing.
    pub fn delay(&self, attempt: usize) -> Duration {
        u32::try_from(attempt)
            .ok()
            .and_then(|exp| 2u32.checked_pow(exp))
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts).map(move |i| self.delay(i))
    }

    /// Polls `attempt` until it reports `Ready`, fails, or attempts run out.
    pub async fn poll<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        for (i, delay) in self.delays().enumerate() {
            info!("waiting {:?} for {}...", delay, what);
            time::sleep(delay).await;

            match attempt(i).await {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Pending(why) => debug!("{} not ready: {}", what, why),
                Attempt::Failed(e) => return Err(e),
            }
        }
        Err(Error::ExhaustedAttempts {
            what: what.to_string(),
            attempts: self.attempts,
        })
    }
}
