//! Busy-poll with a fixed backoff, for transports that only offer try-operations.

use std::time::{Duration, Instant};

/// Sleep between attempts unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Elapsed-time budget for one timeout-bounded operation.
///
/// A negative timeout never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn from_timeout_ms(timeout_ms: i32) -> Self {
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.timeout.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn expired(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.start.elapsed() >= timeout,
            None => false,
        }
    }
}

/// Outcome of one attempt inside [`poll_until`].
pub enum Attempt<T, E> {
    Done(T),
    /// Transient condition (full/empty); retry after the interval.
    Retry(E),
    Fatal(E),
}

/// Runs `attempt` until it finishes, fails fatally, or the deadline passes.
///
/// On expiry the last transient error is returned, so a zero timeout makes
/// exactly one attempt.
pub fn poll_until<T, E>(
    deadline: Deadline,
    interval: Duration,
    mut attempt: impl FnMut() -> Attempt<T, E>,
) -> Result<T, E> {
    loop {
        match attempt() {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                if deadline.expired() {
                    return Err(err);
                }
            }
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_makes_one_attempt() {
        let mut calls = 0;
        let res: Result<(), &str> = poll_until(Deadline::from_timeout_ms(0), DEFAULT_POLL_INTERVAL, || {
            calls += 1;
            Attempt::Retry("full")
        });
        assert_eq!(res, Err("full"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn expiry_is_not_early() {
        let deadline = Deadline::from_timeout_ms(20);
        let res: Result<(), &str> =
            poll_until(deadline, DEFAULT_POLL_INTERVAL, || Attempt::Retry("empty"));
        assert!(res.is_err());
        assert!(deadline.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn negative_timeout_keeps_polling_until_done() {
        let deadline = Deadline::from_timeout_ms(-1);
        assert!(deadline.is_infinite());
        let mut calls = 0;
        let res: Result<u32, &str> = poll_until(deadline, Duration::from_micros(10), || {
            calls += 1;
            if calls < 50 {
                Attempt::Retry("full")
            } else {
                Attempt::Done(calls)
            }
        });
        assert_eq!(res, Ok(50));
    }

    #[test]
    fn fatal_errors_return_immediately() {
        let res: Result<(), &str> =
            poll_until(Deadline::from_timeout_ms(-1), DEFAULT_POLL_INTERVAL, || Attempt::Fatal("boom"));
        assert_eq!(res, Err("boom"));
    }
}
