//! Sliding-window rate limiter
//!
//! The venue allows 600 requests per rolling minute. Each call records its
//! instant; when the window is full, `acquire` sleeps until the oldest
//! request falls out of the window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Limiter for N requests per rolling minute
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record one request, sleeping first if the window is saturated
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();

                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) >= self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    None
                } else {
                    let oldest = *timestamps.front().expect("window is saturated");
                    Some(self.window - now.duration_since(oldest))
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    tracing::warn!(
                        wait_ms = delay.as_millis() as u64,
                        "rate limit window saturated, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Requests currently inside the window
    pub async fn in_flight(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        timestamps.len()
    }
}
