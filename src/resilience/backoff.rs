//! Randomized connect-retry backoff.
//!
//! After `n` consecutive connect failures the next attempt waits a uniformly
//! random whole number of seconds in `[0, 2n - 1]`. There is no ceiling.

use std::time::Duration;
use rand::Rng;

/// Largest delay, in seconds, allowed after `failures` consecutive failures.
pub fn max_wait_secs(failures: u32) -> u64 {
    (failures as u64).saturating_mul(2).saturating_sub(1)
}

/// Delay before the next connect attempt.
pub fn connect_retry_delay(failures: u32) -> Duration {
    connect_retry_delay_with(&mut rand::thread_rng(), failures)
}

/// Same as [`connect_retry_delay`] with a caller-supplied RNG.
pub fn connect_retry_delay_with<R: Rng>(rng: &mut R, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rng.gen_range(0..=max_wait_secs(failures)))
}
