use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Process-wide fixed-window request limiter, shared by every orchestrator
/// that uses one API key.
///
/// `acquire` blocks until a slot is available in the current minute window.
/// This is a guard against vendor throttling, not a strict contract.
pub struct RequestWindow {
    max_per_minute: u32,
    window: Mutex<Window>,
}

impl RequestWindow {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            window: Mutex::new(Window {
                count: 0,
                reset_at: Instant::now() + Duration::from_secs(60),
            }),
        }
    }

    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + Duration::from_secs(60);
        }

        if window.count >= self.max_per_minute {
            let reset_at = window.reset_at;
            tokio::time::sleep_until(reset_at).await;
            window.count = 0;
            window.reset_at = Instant::now() + Duration::from_secs(60);
        }

        window.count += 1;
    }
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::new(50)
    }
}
