use std::time::Duration;

/// An infinite stream of wait durations for retrying an operation, growing
/// by a constant factor until a ceiling is reached and staying there.
///
/// `retry` drives an operation with these durations, sleeping the thread
/// between attempts, so it is meant for the blocking transport threads
/// only.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> Self {
        Self { curr: start, max, factor }
    }

    /// Call `f` until it succeeds or `attempts` calls have failed, sleeping
    /// between attempts. `on_err` sees each failure along with the wait
    /// that follows it. The last error is returned if every attempt fails.
    pub fn retry<T, E, F, S>(self, attempts: usize, mut f: F, on_err: S) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
    {
        let mut waits = self.take(attempts.max(1)).peekable();

        loop {
            let wait = waits.next();

            match f() {
                Ok(value) => return Ok(value),
                Err(e) if waits.peek().is_none() => return Err(e),
                Err(e) => {
                    let wait = wait.unwrap_or_default();
                    on_err(&e, wait);
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let this = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(this)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::cell::Cell;
    use std::time::Duration;
    use super::ExponentialBackoff;

    #[test]
    fn waits_grow_then_saturate() {
        let waits: Vec<_> = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2)
            .take(5)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let result: Result<u32, &str> = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2).retry(
            5,
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err("refused") } else { Ok(7) }
            },
            |_, _| {});
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_with_the_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), usize> = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2).retry(
            4,
            || {
                calls.set(calls.get() + 1);
                Err(calls.get())
            },
            |_, _| {});
        assert_eq!(result, Err(4));
    }
}
