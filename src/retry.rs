use std::thread::sleep;
use std::time::Duration;

use log::warn;

use crate::error::TtsError;

/// Maximum attempts for one remote call, the final attempt included.
pub const MAX_RETRIES: u32 = 12;

/// Backoff unit for production callers; attempt `k` waits `2^k` of these.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Attempt `k` (0-indexed) sleeps `base_delay * 2^k` before the next try.
/// No jitter is applied, so the total wait for `k` transient failures is
/// exactly the sum of the first `k` powers of two times `base_delay`.
/// Permanent failures propagate immediately; exhausting all attempts
/// returns the last transient error.
pub fn with_retry<T, F>(max_attempts: u32, base_delay: Duration, mut op: F) -> Result<T, TtsError>
where
    F: FnMut() -> Result<T, TtsError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let wait = base_delay * 2u32.pow(attempt);
                warn!(
                    "transient failure on attempt {} of {}, retrying in {:?}: {}",
                    attempt + 1,
                    max_attempts,
                    wait,
                    err
                );
                sleep(wait);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Fails transiently `failures` times, then succeeds.
    fn flaky(failures: u32) -> impl FnMut() -> Result<u32, TtsError> {
        let mut calls = 0;
        move || {
            calls += 1;
            if calls <= failures {
                Err(TtsError::transient(format!("outage {calls}")))
            } else {
                Ok(calls)
            }
        }
    }

    #[test]
    fn succeeds_when_failures_stay_under_the_cap() {
        let result = with_retry(MAX_RETRIES, Duration::ZERO, flaky(MAX_RETRIES - 1));
        assert_eq!(result.unwrap(), MAX_RETRIES);
    }

    #[test]
    fn exhausts_attempts_and_returns_last_error() {
        let result = with_retry(3, Duration::ZERO, flaky(3));
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("outage 3"));
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(5, Duration::ZERO, || {
            calls += 1;
            Err(TtsError::permanent("bad credentials"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_millis(2);
        let started = Instant::now();
        with_retry(4, base, flaky(3)).unwrap();
        // Waits of 1x, 2x and 4x the base delay.
        assert!(started.elapsed() >= base * 7);
    }
}
