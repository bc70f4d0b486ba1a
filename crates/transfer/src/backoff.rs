use std::future::Future;
use std::time::Duration;

/// Retry classification for errors fed to the backoff interpreter.
///
/// Non-retryable failures (destination conflicts, user aborts) bypass the
/// delay schedule without consuming any of the budget.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Precomputes the backoff delay sequence for `retry_count` retries.
///
/// `delays[0]` is always zero (the first retry is immediate); subsequent
/// delays double from `base` and are capped at `max`. A count of zero
/// yields an empty schedule, disabling retries entirely.
pub fn retry_delays(retry_count: usize, base: Duration, max: Duration) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(retry_count);
    let mut delay = Duration::ZERO;

    for _ in 0..retry_count {
        delays.push(delay.min(max));
        delay = if delay.is_zero() { base } else { (delay * 2).min(max) };
    }

    delays
}

/// Cursor over a precomputed delay schedule.
///
/// The schedule itself is pure data, so one slice is safely shared across
/// all concurrently active items; each retryable operation holds its own
/// cursor.
pub struct RetrySchedule<'a> {
    delays: &'a [Duration],
    next: usize,
}

impl<'a> RetrySchedule<'a> {
    pub fn new(delays: &'a [Duration]) -> Self {
        Self { delays, next: 0 }
    }

    /// Returns the delay to wait before the next retry, or `None` when the
    /// budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.next).copied()?;
        self.next += 1;
        Some(delay)
    }

    /// Number of retries consumed so far.
    pub fn retries_used(&self) -> usize {
        self.next
    }
}

/// Runs `op` with backoff: one initial attempt plus one retry per delay.
///
/// Non-retryable errors abort immediately; once the schedule is exhausted
/// the last underlying error is returned as-is.
pub async fn with_backoff<T, E, F, Fut>(delays: &[Duration], mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut schedule = RetrySchedule::new(delays);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => match schedule.next_delay() {
                Some(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                None => return Err(err),
            },
        }
    }
}
