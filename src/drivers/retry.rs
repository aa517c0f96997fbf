/// Fixed attempt budget for an operation that can fail transiently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}
impl RetryPolicy {
    /// A budget of zero is treated as one attempt.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    /// Runs `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the budget is spent. `on_retry` sees every failure that will be
    /// retried, with the 1-based number of the attempt that failed. The last
    /// error is returned unchanged.
    pub fn run<T, E, F, P, W>(&self, mut op: F, retryable: P, mut on_retry: W) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        W: FnMut(u32, &E),
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && retryable(&err) => {
                    on_retry(attempt, &err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
