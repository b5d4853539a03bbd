//! Sliding one-minute RPM/TPM gate.
//!
//! Grounded on the `ProxyManager`'s `Arc<RwLock<...>>` + scoring style:
//! synchronous bookkeeping under a lock, exposed through small async methods
//! that sleep in short increments rather than blocking the runtime.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Window {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
}

impl Window {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.requests.front() {
            if now.duration_since(front) > WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(&(ts, _)) = self.tokens.front() {
            if now.duration_since(ts) > WINDOW {
                self.tokens.pop_front();
            } else {
                break;
            }
        }
    }

    fn current_tokens(&self) -> u64 {
        self.tokens.iter().map(|(_, t)| *t).sum()
    }
}

pub struct RateLimiter {
    rpm: u32,
    tpm: u32,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(rpm: u32, tpm: u32) -> Self {
        Self {
            rpm,
            tpm,
            window: Mutex::new(Window::new()),
        }
    }

    /// Blocks (sleeping in small increments) until both counters admit a
    /// batch estimated to cost `tokens`, then records the admission.
    pub async fn acquire(&self, tokens: u64) {
        loop {
            let now = Instant::now();
            let mut window = self.window.lock().await;
            window.prune(now);
            let admits_rpm = (window.requests.len() as u32) < self.rpm;
            let admits_tpm = window.current_tokens() + tokens <= self.tpm as u64;
            if admits_rpm && admits_tpm {
                window.requests.push_back(now);
                window.tokens.push_back((now, tokens));
                return;
            }
            drop(window);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Forces a wait after a provider-signaled rate-limit response, separate
    /// from self-throttling.
    pub async fn force_backoff(&self) {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    pub async fn current_rpm(&self) -> u32 {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        window.requests.len() as u32
    }

    pub async fn current_tpm(&self) -> u32 {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        window.current_tokens() as u32
    }
}
