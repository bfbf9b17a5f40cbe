use std::time::Duration;

const BASE: u64 = 1;
const CAP: u64 = 60;

/// Exponential backoff with a floor of `BASE` seconds and a ceiling of `CAP`
/// seconds: `delay(n) = min(base * 2^n, cap)`. The retry counter it wraps is
/// owned by the caller (the producer loop resets it after a healthy
/// streaming period, see SPEC_FULL §4.4).
#[derive(Debug, Default, Clone, Copy)]
pub struct Backoff {
    retries: u32,
}

impl Backoff {
    pub fn new() -> Backoff {
        Backoff { retries: 0 }
    }

    /// The delay for the current retry count, without advancing it.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(delay_seconds(self.retries))
    }

    /// Advances the retry counter and returns the delay to sleep before the
    /// next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay();
        self.retries = self.retries.saturating_add(1);
        delay
    }

    /// Resets the counter, called after a stream has stayed up long enough
    /// to be considered healthy rather than flapping.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Advances the counter without computing a delay, for callers that
    /// already slept for `delay()` and now need to decide reset-vs-increment
    /// for the *next* attempt (SPEC_FULL §4.4 producer step 2.f).
    pub fn advance(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }
}

fn delay_seconds(n: u32) -> u64 {
    match 1u64.checked_shl(n) {
        Some(pow) => BASE.saturating_mul(pow).min(CAP),
        None => CAP,
    }
}
