//! Injected time source.
//!
//! Every TTL, backoff and resend timer in this crate takes a `Clock`
//! at construction rather than calling `SystemTime::now()` directly,
//! so pending-state expiry, pairing TTLs and resend cadences are
//! deterministic in tests (§9: "a time source injected at
//! construction").

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only advances when told to. Used by tests that need
/// to exercise TTL/backoff boundaries without sleeping.
#[derive(Debug)]
pub struct StepClock {
    now: std::sync::atomic::AtomicU64,
}

impl StepClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: u64) {
        self.now.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
